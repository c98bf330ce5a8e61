pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{architecture_written, bundle_written, error, header, phase, section, success, summary_row, target, timing, warn};
pub use table::{closures_table, relationships_table, resources_table, stats_table, TableBuilder};
pub use theme::{theme, Theme};
