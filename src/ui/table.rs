use crate::arch::{Architecture, Relationship};
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    id: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Arguments")]
    arguments: String,
}

#[derive(Tabled)]
struct ClosureRow {
    #[tabled(rename = "Closure")]
    id: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Env")]
    env: String,
}

#[derive(Tabled)]
struct RelationshipRow {
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Relationship")]
    relationship: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        rounded(&self.rows)
    }
}

fn rounded<T: Tabled>(rows: &[T]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn stats_table(stats: &[(&str, &str)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

pub fn resources_table(arch: &Architecture) -> String {
    let rows: Vec<ResourceRow> = arch
        .resources
        .iter()
        .map(|r| ResourceRow {
            id: r.id.clone(),
            resource_type: r.resource_type.clone(),
            arguments: r.arguments.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
        })
        .collect();
    rounded(&rows)
}

pub fn closures_table(arch: &Architecture) -> String {
    let rows: Vec<ClosureRow> = arch
        .closures
        .iter()
        .map(|c| ClosureRow {
            id: c.id.clone(),
            path: c.path.display().to_string(),
            env: c.accessed_env_vars.join(", "),
        })
        .collect();
    rounded(&rows)
}

pub fn relationships_table(arch: &Architecture) -> String {
    let rows: Vec<RelationshipRow> = arch
        .relationships
        .iter()
        .map(|r| RelationshipRow {
            kind: match r {
                Relationship::Infrastructure { .. } => "infra",
                Relationship::Client { .. } => "client",
                Relationship::CapturedProperty { .. } => "captured",
            },
            relationship: r.to_string(),
        })
        .collect();
    rounded(&rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Argument, Resource};

    #[test]
    fn test_empty_tables_render_nothing() {
        let arch = Architecture::new();
        assert!(resources_table(&arch).is_empty());
        assert!(TableBuilder::new().build().is_empty());
    }

    #[test]
    fn test_resources_table() {
        let mut arch = Architecture::new();
        arch.add_resource(Resource {
            id: "default_dev_q".to_string(),
            name: "q".to_string(),
            resource_type: "@plutolang/pluto.Queue".to_string(),
            arguments: vec![Argument::Text {
                index: 0,
                name: "name".to_string(),
                value: "\"q\"".to_string(),
            }],
        })
        .unwrap();
        arch.add_relationship(Relationship::Client {
            bundle: "c".to_string(),
            resource: "default_dev_q".to_string(),
            operation: "push".to_string(),
        });

        let table = resources_table(&arch);
        assert!(table.contains("default_dev_q"));
        assert!(table.contains("name=\"q\""));
        let table = relationships_table(&arch);
        assert!(table.contains("client"));
        assert!(table.contains("c -> default_dev_q.push()"));
    }
}
