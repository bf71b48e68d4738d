use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;

use ipam_cidr::IpRange;
use ipam_core::Cidr;
use ipam_pool::{Mode, Pool};

/// Drive an in-memory IPAM pool for a single allocation, release, or
/// inspection — one process invocation, one pool, one operation.
#[derive(Parser)]
#[command(name = "ipam")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "human", global = true)]
    output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocate the next free block of a given size
    Alloc(AllocArgs),
    /// Mark a specific CIDR busy
    Busy(CidrArgs),
    /// Release a specific CIDR
    Free(CidrArgs),
    /// Check whether a CIDR is covered by the pool's universe
    Contains(CidrArgs),
    /// Print the pool's block list
    Dump(PoolArgs),
}

/// Shared flags describing how to build the pool for this invocation.
#[derive(Args)]
struct PoolArgs {
    /// Universe CIDR, e.g. 10.0.0.0/24
    cidr: String,

    /// Address range to keep available; may repeat. When given, every
    /// address outside the union of ranges is busied up front.
    #[arg(long = "exclude", value_name = "FROM-TO")]
    excludes: Vec<String>,

    /// Allocate round-robin across same-size blocks instead of first-match
    #[arg(long)]
    round_robin: bool,
}

#[derive(Args)]
struct AllocArgs {
    #[command(flatten)]
    pool: PoolArgs,

    /// Prefix length to allocate, e.g. 28
    size: u8,
}

#[derive(Args)]
struct CidrArgs {
    #[command(flatten)]
    pool: PoolArgs,

    /// CIDR to busy, free, or test for coverage
    target: String,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Serialize)]
struct AllocResult {
    cidr: Option<String>,
    dump: String,
}

#[derive(Serialize)]
struct MutateResult {
    ok: bool,
    dump: String,
}

#[derive(Serialize)]
struct ContainsResult {
    contains: bool,
}

#[derive(Serialize)]
struct DumpResult {
    dump: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "ipam_pool=info,ipam_alloc=info".parse().expect("static directive"),
            ))
            .init();
    }

    match cli.command {
        Commands::Alloc(args) => handle_alloc(args, cli.output)?,
        Commands::Busy(args) => handle_busy(args, cli.output)?,
        Commands::Free(args) => handle_free(args, cli.output)?,
        Commands::Contains(args) => handle_contains(args, cli.output)?,
        Commands::Dump(args) => handle_dump(args, cli.output)?,
    }

    Ok(())
}

fn build_pool(args: &PoolArgs) -> Result<Pool> {
    let mode = if args.round_robin {
        Mode::RoundRobin
    } else {
        Mode::FirstMatch
    };
    let cidr = Cidr::parse(&args.cidr).with_context(|| format!("invalid CIDR: {}", args.cidr))?;

    if args.excludes.is_empty() {
        Ok(Pool::new(cidr, mode)?)
    } else {
        let ranges = args
            .excludes
            .iter()
            .map(|r| IpRange::parse(r).with_context(|| format!("invalid range: {r}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Pool::with_excludes(cidr, ranges, mode)?)
    }
}

fn handle_alloc(args: AllocArgs, format: OutputFormat) -> Result<()> {
    let pool = build_pool(&args.pool)?;
    let cidr = pool.alloc(args.size);
    let result = AllocResult {
        cidr: cidr.as_ref().map(|c| c.to_string()),
        dump: pool.dump(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Human => match &result.cidr {
            Some(cidr) => println!("{} {}", "allocated".green(), cidr),
            None => println!("{}", "pool exhausted".red()),
        },
    }
    Ok(())
}

fn handle_busy(args: CidrArgs, format: OutputFormat) -> Result<()> {
    let pool = build_pool(&args.pool)?;
    let target =
        Cidr::parse(&args.target).with_context(|| format!("invalid CIDR: {}", args.target))?;
    let ok = pool.busy(&target);
    print_mutate(ok, &pool, format)
}

fn handle_free(args: CidrArgs, format: OutputFormat) -> Result<()> {
    let pool = build_pool(&args.pool)?;
    let target =
        Cidr::parse(&args.target).with_context(|| format!("invalid CIDR: {}", args.target))?;
    let ok = pool.free(&target);
    print_mutate(ok, &pool, format)
}

fn print_mutate(ok: bool, pool: &Pool, format: OutputFormat) -> Result<()> {
    let result = MutateResult { ok, dump: pool.dump() };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Human => {
            if ok {
                println!("{}", "ok".green());
            } else {
                println!("{}", "refused".red());
            }
        }
    }
    Ok(())
}

fn handle_contains(args: CidrArgs, format: OutputFormat) -> Result<()> {
    let pool = build_pool(&args.pool)?;
    let target =
        Cidr::parse(&args.target).with_context(|| format!("invalid CIDR: {}", args.target))?;
    let result = ContainsResult {
        contains: pool.contains(&target),
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Human => println!("{}", result.contains),
    }
    Ok(())
}

fn handle_dump(args: PoolArgs, format: OutputFormat) -> Result<()> {
    let pool = build_pool(&args)?;
    let result = DumpResult { dump: pool.dump() };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Human => println!("{}", result.dump),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alloc_command() {
        let cli = Cli::parse_from(["ipam", "alloc", "10.0.0.0/24", "28"]);
        match cli.command {
            Commands::Alloc(args) => {
                assert_eq!(args.pool.cidr, "10.0.0.0/24");
                assert_eq!(args.size, 28);
            }
            _ => panic!("expected Alloc command"),
        }
    }

    #[test]
    fn parses_excludes_and_round_robin() {
        let cli = Cli::parse_from([
            "ipam",
            "dump",
            "10.0.0.0/24",
            "--exclude",
            "10.0.0.10-10.0.0.250",
            "--round-robin",
        ]);
        match cli.command {
            Commands::Dump(args) => {
                assert_eq!(args.excludes, vec!["10.0.0.10-10.0.0.250".to_string()]);
                assert!(args.round_robin);
            }
            _ => panic!("expected Dump command"),
        }
    }

    #[test]
    fn parses_output_format_json() {
        let cli = Cli::parse_from(["ipam", "--output", "json", "contains", "10.0.0.0/24", "10.0.0.5/32"]);
        assert!(matches!(cli.output, OutputFormat::Json));
    }
}
