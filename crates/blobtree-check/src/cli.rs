use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "blobtree-check",
    about = "Check a blob tree database for inconsistencies",
    version
)]
pub struct Cli {
    /// Database root directory
    #[arg(short, long)]
    pub database: PathBuf,

    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Log progress and list what was checked
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_database() {
        let cli = Cli::try_parse_from(["blobtree-check", "--database", "/srv/blobs"]).unwrap();
        assert_eq!(cli.database, PathBuf::from("/srv/blobs"));
        assert!(!cli.verbose);
        assert!(matches!(cli.format, OutputFormat::Text));
    }

    #[test]
    fn parse_json_verbose() {
        let cli =
            Cli::try_parse_from(["blobtree-check", "-d", "db", "--format", "json", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.format, OutputFormat::Json));
    }

    #[test]
    fn database_is_required() {
        assert!(Cli::try_parse_from(["blobtree-check"]).is_err());
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(Cli::try_parse_from(["blobtree-check", "-d", "db", "--format", "xml"]).is_err());
    }
}
