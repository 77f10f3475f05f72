//! # mwquery 命令行工具
//!
//! 编译搜索查询，打印条件树和生成的SQL。不带查询参数时进入交互模式。
//!
//! ```bash
//! mwquery 'tag:emotet AND file.size:>1M'
//! mwquery --kind file d41d8cd98f00b204e9800998ecf8427e
//! mwquery --config search.json --json 'child:(family:"evil")'
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use mwquery::{ObjectKind, QueryCompiler, QueryError, SearchConfig, SqlCompiler, Visibility};

#[derive(Parser)]
#[command(name = "mwquery")]
#[command(about = "Compile Lucene search queries for a malware repository into SQL")]
#[command(version)]
struct Cli {
    /// Query to compile; starts an interactive prompt when omitted
    query: Option<String>,

    /// Kind of objects to search (object, file, config, blob)
    #[arg(short, long)]
    kind: Option<ObjectKind>,

    /// Path to a JSON search config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma-separated groups share conditions are limited to
    #[arg(long, value_delimiter = ',')]
    visible_groups: Option<Vec<String>>,

    /// Print the condition tree as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// 根据命令行参数和配置创建一次，供每条查询使用
struct Session {
    compiler: QueryCompiler<'static>,
    sql: SqlCompiler,
    json: bool,
}

impl Session {
    fn new(cli: &Cli) -> Result<Self> {
        // 优先使用JSON配置，未指定时使用默认配置
        let config = match &cli.config {
            Some(path) => {
                let config = SearchConfig::from_json_file(path)
                    .with_context(|| format!("Failed to load config from {}", path.display()))?;
                info!(path = %path.display(), tables = config.tables.len(), "loaded search config");
                config
            }
            None => SearchConfig::default(),
        };

        let mut options = config.compile_options();
        if let Some(kind) = cli.kind {
            options.kind = kind;
        }
        if let Some(groups) = &cli.visible_groups {
            options.visibility = Visibility::groups(groups.iter().cloned());
        }

        Ok(Self {
            compiler: QueryCompiler::new(options),
            sql: config.sql_compiler(),
            json: cli.json,
        })
    }

    fn run(&self, query: &str) -> Result<()> {
        let compiled = self.compiler.compile_str(query)?;

        println!("[kind] {}", compiled.kind);
        if self.json {
            let json = serde_json::to_string_pretty(&compiled.condition)
                .context("Failed to serialize condition tree")?;
            println!("[condition]\n{json}");
        } else {
            println!("[condition] {}", compiled.condition);
        }

        // SQL 编译器 - 条件树转换为SQL
        let result = self.sql.compile(&compiled.condition, compiled.kind)?;
        println!("[sql] {}", result.sql);
        Ok(())
    }
}

fn repl(session: &Session) -> Result<()> {
    let mut editor = DefaultEditor::new().context("Failed to start line editor")?;
    println!("mwquery {} (Ctrl-D to exit)", env!("CARGO_PKG_VERSION"));

    loop {
        match editor.readline("mwquery> ") {
            Ok(line) => {
                let query = line.trim();
                if query.is_empty() {
                    continue;
                }
                editor.add_history_entry(query)?;
                if let Err(e) = session.run(query) {
                    match e.downcast_ref::<QueryError>() {
                        Some(query_error) if !query_error.is_user_error() => {
                            error!("internal error: {query_error}")
                        }
                        _ => eprintln!("error: {e:#}"),
                    }
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("Failed to read line"),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let session = Session::new(&cli)?;
    match &cli.query {
        Some(query) => session.run(query),
        None => repl(&session),
    }
}
