use clap::{Parser, Subcommand, ValueEnum};

use crate::models::CrawlMode;

/// golamv2 cli
#[derive(Parser)]
#[command(name = "golamv2")]
#[command(about = "Memory-bounded web crawler with multiple hunting modes")]
#[command(version)]
pub struct Cli {
    /// Starting URL to crawl (required unless a subcommand is given)
    #[arg(long, help = "Starting URL to crawl")]
    pub url: Option<String>,

    /// hunt emails
    #[arg(long, help = "Hunt for email addresses")]
    pub email: bool,

    /// hunt dead links and domains
    #[arg(long, help = "Hunt for dead URLs and domains")]
    pub domains: bool,

    /// hunt keywords
    #[arg(
        long,
        value_delimiter = ',',
        help = "Hunt for specific keywords (comma-separated)"
    )]
    pub keywords: Vec<String>,

    /// worker count
    #[arg(long, default_value = "50", help = "Maximum number of concurrent workers")]
    pub workers: usize,

    /// memory ceiling
    #[arg(long, default_value = "500", help = "Maximum memory usage in MB")]
    pub memory: u64,

    /// crawl depth
    #[arg(long, default_value = "5", help = "Maximum crawling depth")]
    pub depth: u32,

    /// dashboard port
    #[arg(long, default_value = "8080", help = "Dashboard port")]
    pub dashboard: u16,

    /// data directory
    #[arg(
        long,
        default_value = "./golamv2_data",
        help = "Directory for databases and logs"
    )]
    pub data_dir: String,

    /// dead-link sampling fraction
    #[arg(
        long,
        default_value = "0.2",
        help = "Fraction of outlinks sampled for dead-link checking"
    )]
    pub sample_rate: f64,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect crawl databases offline (the engine must not be running)
    Explore {
        /// data directory
        #[arg(
            short,
            long,
            default_value = "./golamv2_data",
            help = "Path to the data directory"
        )]
        data: String,

        /// which findings database to open
        #[arg(long, value_enum, default_value = "all", help = "Mode the crawl ran in")]
        mode: CrawlMode,

        /// what to show
        #[arg(value_enum, default_value_t = ExploreView::Stats)]
        view: ExploreView,

        /// entry limit
        #[arg(short, long, default_value = "20", help = "Maximum entries to list")]
        limit: usize,

        /// search term for the search view
        #[arg(long, help = "Substring to search for (search view only)")]
        term: Option<String>,

        /// export destination for the export view
        #[arg(
            long,
            default_value = "golamv2_export.jsonl",
            help = "Output file (export view only)"
        )]
        output: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExploreView {
    Stats,
    Urls,
    Results,
    Emails,
    DeadLinks,
    Search,
    Export,
}

impl Cli {
    /// parse args
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Derive the crawl mode from the flags; `None` when no hunting
    /// mode was requested.
    pub fn derive_mode(&self) -> Option<CrawlMode> {
        let mut modes = Vec::new();

        if self.email {
            modes.push(CrawlMode::Email);
        }
        if self.domains {
            modes.push(CrawlMode::Domains);
        }
        if !self.keywords.is_empty() {
            modes.push(CrawlMode::Keywords);
        }

        match modes.len() {
            0 => None,
            1 => Some(modes[0]),
            _ => Some(CrawlMode::All),
        }
    }
}

// clap needs ValueEnum or FromStr for --mode; CrawlMode implements
// FromStr in models.rs and this wires it through
impl ValueEnum for CrawlMode {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            CrawlMode::Email,
            CrawlMode::Keywords,
            CrawlMode::Domains,
            CrawlMode::All,
        ]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(match self {
            CrawlMode::Email => "email",
            CrawlMode::Keywords => "keywords",
            CrawlMode::Domains => "domains",
            CrawlMode::All => "all",
        }))
    }
}
