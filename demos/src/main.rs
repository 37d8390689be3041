use std::fs;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use french_statement_parser::{credit_debit_totals_cents, detect, parse};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(short, long)]
    filename: PathBuf,

    /// Bank id to parse with (e.g. `bnp`, `lcl`, `societe-generale`).
    /// Auto-detected from the PDF's text when omitted.
    #[arg(short, long)]
    bank: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let bytes = fs::read(&args.filename).expect("failed to read PDF file");

    let bank_id = match args.bank {
        Some(id) => id,
        None => match detect(&bytes) {
            Ok(Some(id)) => id.as_str().to_string(),
            Ok(None) => {
                eprintln!("could not identify the issuing bank");
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("detection failed: {e}");
                std::process::exit(1);
            }
        },
    };

    match parse(&bytes, &bank_id) {
        Ok(transactions) => {
            for txn in &transactions {
                println!("{:?}", txn);
            }
            let (credit, debit) = credit_debit_totals_cents(&transactions);
            println!(
                "totals: credit={:.2} debit={:.2}",
                credit as f64 / 100.0,
                debit as f64 / 100.0
            );
        }
        Err(e) => {
            eprintln!("parse failed: {e}");
            std::process::exit(1);
        }
    }
}
