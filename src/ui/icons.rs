pub struct Icons;

impl Icons {
    pub const ROCKET: &str = "🚀";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const FILE: &str = "📄";
    pub const PACKAGE: &str = "📦";
    pub const CLOUD: &str = "☁️";
    pub const CLOCK: &str = "⏱️";
    pub const GEAR: &str = "⚙️";
}
