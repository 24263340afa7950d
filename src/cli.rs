use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "nbkit")]
#[command(about = "Run a demo workload through the nbkit parallel apply helper")]
#[command(
    long_about = "Run a demo workload through the nbkit parallel apply helper\n\nEach number is one work item. A worker prints --chatter progress lines per item \
through the shared printer and returns twice the number. Results are printed as \
'result <value>' in input order unless --unordered is given.\n\nNumbers are read from \
stdin, one per line, when none are given on the command line."
)]
#[command(version)]
pub struct Cli {
    /// Work items
    #[arg(allow_negative_numbers = true)]
    pub numbers: Vec<i64>,

    /// Worker threads (default: one per CPU)
    #[arg(short = 'j', long = "threads", help_heading = "Performance Options")]
    pub threads: Option<usize>,

    /// Yield results as workers finish instead of in input order
    #[arg(long = "unordered", help_heading = "Performance Options")]
    pub unordered: bool,

    /// Progress lines each work item prints
    #[arg(long = "chatter", default_value_t = 0, help_heading = "Workload Options")]
    pub chatter: usize,

    /// Width of the filler pattern in each progress line
    #[arg(long = "width", default_value_t = 64, help_heading = "Workload Options")]
    pub width: usize,

    /// Make the work item with this value fail
    #[arg(long = "fail-on", allow_negative_numbers = true, help_heading = "Workload Options")]
    pub fail_on: Option<i64>,

    /// Enable debug diagnostics on stderr
    #[arg(short = 'd', long = "debug", help_heading = "Display Options")]
    pub debug: bool,
}
