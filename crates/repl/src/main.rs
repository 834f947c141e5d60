use anyhow::Result;
use clap::Parser;
use common::pretty::{self, TableStyleKind};
use common::{Config, DbResult, RecordBatch};
use database::{Database, QueryResult};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::process::ExitCode;

const DEFAULT_DB_FILE: &str = "./minisql.db";

#[derive(Parser, Debug)]
#[command(name = "minisql", about = "Interactive SQL console for the minisql database")]
struct Args {
    /// Database file; created on first use
    #[arg(default_value = DEFAULT_DB_FILE)]
    database: PathBuf,
    /// Maximum number of pages held in the page cache
    #[arg(long, default_value_t = 64)]
    cache_pages: usize,
    /// Execute the provided SQL and exit instead of starting the shell
    #[arg(short = 'e', long = "execute")]
    execute: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let config = Config::builder().cache_pages(args.cache_pages).build();
    let mut db = Database::open(&args.database, &config)?;

    if let Some(sql) = args.execute {
        // Execute mode: run the SQL and exit with a status code.
        return Ok(match execute_and_print(&mut db, &sql) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error: {err}");
                ExitCode::FAILURE
            }
        });
    }

    shell(&mut db)?;
    Ok(ExitCode::SUCCESS)
}

fn shell(db: &mut Database) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("minisql - .help for help, .exit to quit");

    loop {
        match editor.readline("minisql> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);

                if let Some(meta) = line.strip_prefix('.') {
                    if !meta_command(db, meta)? {
                        break;
                    }
                    continue;
                }

                // Statement errors do not end the session.
                if let Err(err) = execute_and_print(db, line) {
                    eprintln!("error: {err}");
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Handle a `.command`; returns false when the shell should exit.
fn meta_command(db: &mut Database, command: &str) -> Result<bool> {
    let mut parts = command.split_whitespace();
    match parts.next().unwrap_or("") {
        "exit" | "quit" => return Ok(false),
        "help" => {
            println!(".help            show this help");
            println!(".tables          list tables");
            println!(".schema <table>  describe a table");
            println!(".exit            leave the shell");
        }
        "tables" => {
            let mut names: Vec<String> =
                db.tables()?.into_iter().map(|schema| schema.name).collect();
            names.sort();
            if names.is_empty() {
                println!("<no tables>");
            } else {
                for name in names {
                    println!("{name}");
                }
            }
        }
        "schema" => {
            let Some(name) = parts.next() else {
                eprintln!("usage: .schema <table>");
                return Ok(true);
            };
            match db.tables()?.into_iter().find(|s| s.name == name) {
                Some(schema) => {
                    let rows = schema
                        .columns
                        .iter()
                        .map(|c| {
                            vec![
                                c.name.clone(),
                                c.ty.to_string(),
                                if c.primary_key { "PRIMARY KEY" } else { "" }.to_string(),
                            ]
                        })
                        .collect();
                    println!(
                        "{}",
                        pretty::render_string_table(
                            &["column", "type", "key"],
                            rows,
                            TableStyleKind::Modern,
                        )
                    );
                    println!("{} row(s)", schema.row_count);
                }
                None => eprintln!("unknown table '{name}'"),
            }
        }
        other => eprintln!("unknown command '.{other}'; try .help"),
    }
    Ok(true)
}

fn execute_and_print(db: &mut Database, sql: &str) -> DbResult<()> {
    for result in db.execute(sql)? {
        match result {
            QueryResult::Rows { columns, rows } => {
                let count = rows.len();
                let batch = RecordBatch { columns, rows };
                println!(
                    "{}",
                    pretty::render_record_batch(&batch, TableStyleKind::Modern)
                );
                println!("{count} row(s)");
            }
            QueryResult::Count { affected } => println!("{affected} row(s) affected."),
            QueryResult::Empty => println!("ok."),
        }
    }
    Ok(())
}
