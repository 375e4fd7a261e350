use clap::{Parser, ValueEnum};
use relnav::fields::{field_options, grouped_options};
use relnav::graph::{classify, junction_relations};
use relnav::schema::{DatabaseSchema, SchemaError};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Report {
    /// Many-to-many relations of the anchor table
    Relations,
    /// Selectable field paths around the anchor table
    Fields,
    /// Role of every table in the schema
    Roles,
}

#[derive(Parser)]
#[command(name = "relnav", version, about = "Explore relationships of a relational schema")]
struct Cli {
    /// Schema payload: {"tables": {...}, "tableMeta": {...}}
    schema: PathBuf,

    /// Anchor table
    #[arg(short, long)]
    table: Option<String>,

    #[arg(short, long, value_enum, default_value = "fields")]
    report: Report,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct RoleRow<'a> {
    table: &'a str,
    role: relnav::graph::TableRole,
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => {
            eprintln!("Failed to encode output: {}", e);
            process::exit(1);
        }
    }
}

fn require_table(cli: &Cli, schema: &DatabaseSchema) -> String {
    let Some(table) = cli.table.clone() else {
        eprintln!("--table is required for this report");
        process::exit(1);
    };
    if !schema.has_table(&table) {
        eprintln!("Unknown table: {}", table);
        process::exit(1);
    }
    table
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let schema = match DatabaseSchema::from_path(&cli.schema) {
        Ok(s) => s,
        Err(SchemaError::Io { path, source }) => {
            eprintln!("Failed to read {}: {}", path, source);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    info!(tables = schema.tables.len(), path = %cli.schema.display(), "schema read");

    match cli.report {
        Report::Roles => {
            let rows: Vec<RoleRow> = schema
                .table_names()
                .map(|table| RoleRow {
                    table,
                    role: classify(&schema, table),
                })
                .collect();
            if cli.json {
                print_json(&rows);
            } else {
                for row in rows {
                    println!(
                        "{:<24} {:<9} ({})",
                        row.table,
                        row.role.table_type.as_str(),
                        match row.role.source {
                            relnav::graph::RoleSource::Declared => "declared",
                            relnav::graph::RoleSource::Inferred => "inferred",
                        }
                    );
                }
            }
        }
        Report::Relations => {
            let table = require_table(&cli, &schema);
            let relations = junction_relations(&schema, &table);
            if cli.json {
                print_json(&relations);
            } else if relations.is_empty() {
                println!("{} has no many-to-many relations", table);
            } else {
                for rel in relations {
                    println!(
                        "{}.{} <- {}.{} / {}.{} -> {}.{}",
                        table,
                        rel.main_ref_column,
                        rel.junction_table,
                        rel.main_fk_column,
                        rel.junction_table,
                        rel.far_fk_column,
                        rel.far_table,
                        rel.far_ref_column
                    );
                }
            }
        }
        Report::Fields => {
            let table = require_table(&cli, &schema);
            let options = field_options(&schema, &table);
            if cli.json {
                print_json(&options);
            } else {
                for group in grouped_options(&options) {
                    println!("{}", group.name);
                    for option in group.options {
                        println!("  {:<32} {}", option.value, option.label);
                    }
                }
            }
        }
    }
}
