use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufRead};

use nbkit::logging::init_logger;
use nbkit::platform::ExitCode;
use nbkit::{MpRuntime, Order};

mod cli;

use cli::Cli;

/// Characters repeated to build the filler of each progress line
const PATTERN: &str = "0123456789abcdefghijklmnopqrstuvwxyz";

fn main() {
    let cli = Cli::parse();
    init_logger(cli.debug);

    match run(&cli) {
        Ok(code) => code.exit(),
        Err(e) => {
            eprintln!("nbkit: {:#}", e);
            ExitCode::GeneralError.exit();
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let numbers = if cli.numbers.is_empty() {
        match read_numbers(io::stdin().lock()) {
            Ok(numbers) => numbers,
            Err(e) => {
                eprintln!("nbkit: {:#}", e);
                return Ok(ExitCode::InvalidUsage);
            }
        }
    } else {
        cli.numbers.clone()
    };

    let mut builder = MpRuntime::builder();
    if let Some(threads) = cli.threads {
        builder = builder.workers(threads);
    }
    let runtime = builder.build();
    log::debug!("Running {} items in {:?} mode", numbers.len(), runtime.mode());

    let printer = runtime.printer();
    let chatter = cli.chatter;
    let filler = filler(cli.width);
    let fail_on = cli.fail_on;

    let mut results = runtime.try_apply(
        move |n: i64| {
            for step in 0..chatter {
                printer.print(format!("item={} step={} {}", n, step, filler));
            }
            if fail_on == Some(n) {
                anyhow::bail!("refusing to process {}", n);
            }
            n.checked_mul(2)
                .with_context(|| format!("{} * 2 overflows", n))
        },
        numbers,
        Order::from_preserve(!cli.unordered),
    );

    let mut failed = false;
    for result in results.by_ref() {
        match result {
            Ok(value) => runtime.print(format!("result {}", value)),
            Err(e) => {
                eprintln!("nbkit: {}", e);
                failed = true;
            }
        }
    }
    if let Err(e) = results.finish() {
        eprintln!("nbkit: {}", e);
        failed = true;
    }

    Ok(if failed {
        ExitCode::GeneralError
    } else {
        ExitCode::Success
    })
}

fn read_numbers<R: BufRead>(reader: R) -> Result<Vec<i64>> {
    let mut numbers = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("failed to read stdin")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let number = trimmed
            .parse()
            .with_context(|| format!("line {}: '{}' is not an integer", idx + 1, trimmed))?;
        numbers.push(number);
    }
    Ok(numbers)
}

fn filler(width: usize) -> String {
    PATTERN.chars().cycle().take(width).collect()
}
