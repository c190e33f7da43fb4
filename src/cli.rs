use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "chain-insight", version, about = "Heuristic transaction and block analysis")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Override bind address, e.g. 0.0.0.0:8080
        #[arg(long)]
        addr: Option<String>,
    },
    /// Analyze one transaction and print the result as JSON
    AnalyzeTx {
        hash: String,
        /// Network id; defaults to DEFAULT_NETWORK_ID
        #[arg(long)]
        network: Option<u64>,
    },
    /// Analyze a block by number, or "latest"
    AnalyzeBlock {
        block: String,
        #[arg(long)]
        network: Option<u64>,
    },
    /// List supported networks
    Networks,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_analyze_block_with_network() {
        let cli = Cli::try_parse_from(["chain-insight", "analyze-block", "latest", "--network", "10"])
            .unwrap();
        match cli.command {
            Commands::AnalyzeBlock { block, network } => {
                assert_eq!(block, "latest");
                assert_eq!(network, Some(10));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn serve_addr_is_optional() {
        let cli = Cli::try_parse_from(["chain-insight", "serve"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { addr: None }));
    }
}
