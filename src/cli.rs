//! CLI argument parsing for the maysa-dispatch binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "maysa-dispatch", about = "Maysa delivery dispatch worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the dispatch worker (default if no subcommand given)
    Serve,
    /// Price a delivery from the command line and exit
    Quote {
        /// Road distance in kilometres
        #[arg(long)]
        distance_km: f64,
        /// Total parcel weight in kilograms
        #[arg(long, default_value_t = 0.0)]
        weight_kg: f64,
        /// normal, express or urgent
        #[arg(long, default_value = "normal")]
        priority: String,
        /// Extra cost of the chosen time window
        #[arg(long, default_value_t = 0.0)]
        window_cost: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["maysa-dispatch"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_serve_command_parses() {
        let cli = Cli::parse_from(["maysa-dispatch", "serve"]);
        assert!(matches!(cli.command, Some(Command::Serve)));
    }

    #[test]
    fn test_cli_quote_command_parses() {
        let cli = Cli::parse_from([
            "maysa-dispatch",
            "quote",
            "--distance-km",
            "10",
            "--weight-kg",
            "2",
            "--priority",
            "urgent",
        ]);
        match cli.command {
            Some(Command::Quote {
                distance_km,
                weight_kg,
                priority,
                window_cost,
            }) => {
                assert_eq!(distance_km, 10.0);
                assert_eq!(weight_kg, 2.0);
                assert_eq!(priority, "urgent");
                assert_eq!(window_cost, 0.0);
            }
            _ => panic!("expected quote command"),
        }
    }
}
