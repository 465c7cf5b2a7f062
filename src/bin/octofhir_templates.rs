// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command-line interface for rendering templates
//!
//! Templates are loaded from the directory of the given file, so `extends`,
//! `include` and `import` resolve against its siblings.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use octofhir_templates::{
    Environment, EnvironmentOptions, FileSystemLoader, Namespace, Syntax, UndefinedPolicy, Value,
};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "octofhir-templates")]
#[command(about = "Render, tokenize and compile Jinja-style templates")]
#[command(version)]
#[command(author = "OctoFHIR Team <funyloony@gmail.com>")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SyntaxArgs {
    /// JSON file overriding marker strings, e.g. {"variable_start": "${"}
    #[arg(long)]
    syntax: Option<PathBuf>,
    /// Remove the first newline after a block tag
    #[arg(long)]
    trim_blocks: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template to stdout
    Render {
        /// Template file
        file: PathBuf,
        /// JSON object with template variables ("-" reads stdin)
        #[arg(short, long)]
        data: Option<String>,
        /// Extra variable as name=value; repeatable, overrides --data
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,
        /// Fail on undefined variables instead of rendering them empty
        #[arg(long)]
        strict: bool,
        /// HTML-escape output
        #[arg(long)]
        autoescape: bool,
        /// Group output into chunks of N pieces
        #[arg(long, value_name = "N")]
        buffer: Option<usize>,
        #[command(flatten)]
        syntax: SyntaxArgs,
    },
    /// Print the token stream of a template
    Lex {
        file: PathBuf,
        #[command(flatten)]
        syntax: SyntaxArgs,
    },
    /// Print the bytecode disassembly of a template
    Compile {
        file: PathBuf,
        /// Skip the constant folder
        #[arg(long)]
        no_optimize: bool,
        #[command(flatten)]
        syntax: SyntaxArgs,
    },
}

fn main() {
    human_panic::setup_panic!();
    env_logger::init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Render {
            file,
            data,
            vars,
            strict,
            autoescape,
            buffer,
            syntax,
        } => handle_render(&file, data.as_deref(), &vars, strict, autoescape, buffer, &syntax),
        Commands::Lex { file, syntax } => handle_lex(&file, &syntax),
        Commands::Compile {
            file,
            no_optimize,
            syntax,
        } => handle_compile(&file, no_optimize, &syntax),
    };

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn options(args: &SyntaxArgs) -> Result<EnvironmentOptions> {
    let syntax = match &args.syntax {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading syntax file {}", path.display()))?;
            serde_json::from_str::<Syntax>(&text)
                .with_context(|| format!("parsing syntax file {}", path.display()))?
        }
        None => Syntax::default(),
    };
    Ok(EnvironmentOptions {
        syntax,
        trim_blocks: args.trim_blocks,
        ..EnvironmentOptions::default()
    })
}

fn split_file(file: &Path) -> Result<(PathBuf, String)> {
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid template path {}", file.display()))?
        .to_string();
    let dir = match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name))
}

fn read_data(data: Option<&str>) -> Result<Namespace> {
    let text = match data {
        None => return Ok(Namespace::new()),
        Some("-") => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("reading variables from stdin")?;
            buffer
        }
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("reading data file {path}"))?
        }
    };
    let json: serde_json::Value = serde_json::from_str(&text).context("parsing variables")?;
    Ok(Namespace::from_json(json)?)
}

fn parse_var(raw: &str) -> Result<(String, Value)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("expected NAME=VALUE, got '{raw}'");
    };
    // JSON literals are taken as typed values, anything else as a string
    let value = serde_json::from_str::<serde_json::Value>(value)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(value));
    Ok((name.trim().to_string(), value))
}

fn handle_render(
    file: &Path,
    data: Option<&str>,
    vars: &[String],
    strict: bool,
    autoescape: bool,
    buffer: Option<usize>,
    syntax: &SyntaxArgs,
) -> Result<()> {
    let (dir, name) = split_file(file)?;
    let env = Environment::with_options(EnvironmentOptions {
        undefined: if strict {
            UndefinedPolicy::Strict
        } else {
            UndefinedPolicy::Lenient
        },
        autoescape,
        loader: Some(Arc::new(FileSystemLoader::new(dir))),
        ..options(syntax)?
    })?;

    let variables = read_data(data)?;
    for raw in vars {
        let (key, value) = parse_var(raw)?;
        variables.insert(key, value);
    }

    let template = env.get_template(&name, None, None)?;
    let mut stream = template.stream(variables);
    if let Some(size) = buffer {
        stream.enable_buffering(size)?;
    }
    stream.dump(io::stdout().lock())?;
    Ok(())
}

fn handle_lex(file: &Path, syntax: &SyntaxArgs) -> Result<()> {
    let source = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let env = Environment::with_options(options(syntax)?)?;
    for token in env.lex(&source)? {
        println!("{:>4}  {}", token.line, token.kind);
    }
    Ok(())
}

fn handle_compile(file: &Path, no_optimize: bool, syntax: &SyntaxArgs) -> Result<()> {
    let source = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let (_, name) = split_file(file)?;
    let env = Environment::with_options(EnvironmentOptions {
        optimize: !no_optimize,
        ..options(syntax)?
    })?;
    let filename = file.display().to_string();
    print!("{}", env.compile_raw(&source, Some(&name), Some(&filename))?);
    Ok(())
}
