// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::{Parser, Subcommand};
use csv::{ReaderBuilder, Trim, Writer};
use muffi_ledger::http::{AppState, create_router};
use muffi_ledger::{Balance, Credits, Engine, ServerConfig, TransactionKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Muffi ledger - credit ledger service for couples
#[derive(Parser, Debug)]
#[command(name = "muffi-ledger")]
#[command(about = "Credit ledger for linked partner accounts", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// TOML config file (falls back to MUFFI_CONFIG)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Recompute balances from a ledger CSV export
    ///
    /// Expected format: user,type,amount,reason
    /// Example: muffi-ledger replay ledger.csv > balances.csv
    Replay {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    dotenvy::dotenv().ok();

    let args = Args::parse();
    match args.command {
        Command::Serve { config } => serve(config),
        Command::Replay { input } => replay(input),
    }
}

fn serve(config_path: Option<PathBuf>) {
    let config = match ServerConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Error starting runtime: {}", e);
            process::exit(1);
        }
    };

    let result: std::io::Result<()> = runtime.block_on(async {
        let state = AppState::new(Engine::with_config(config.ledger));
        let listener = TcpListener::bind(config.bind).await?;
        info!("Ledger API listening on http://{}", listener.local_addr()?);
        axum::serve(listener, create_router(state)).await
    });
    if let Err(e) = result {
        error!("Server error: {}", e);
        process::exit(1);
    }
}

fn replay(input: PathBuf) {
    let file = match File::open(&input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", input.display(), e);
            process::exit(1);
        }
    };

    let rows = match replay_ledger(BufReader::new(file)) {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("Error replaying ledger: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_balances(&rows, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record of a ledger export.
///
/// Fields: `user, type, amount, reason`. The reason is not needed to
/// recompute a balance and is ignored.
#[derive(Debug, Deserialize)]
struct LedgerRecord {
    user: String,
    #[serde(rename = "type")]
    kind: String,
    amount: Credits,
}

/// Recomputed totals for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayRow {
    pub user: String,
    pub earned: Credits,
    pub spent: Credits,
    pub balance: Credits,
    /// The running balance dipped below zero at some point in the file.
    pub went_negative: bool,
}

/// Folds a ledger export into per-user balances, in file order.
///
/// Rows with an unknown type, a non-positive amount or a malformed shape are
/// skipped.
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
pub fn replay_ledger<R: Read>(reader: R) -> Result<Vec<ReplayRow>, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut totals: BTreeMap<String, (Balance, bool)> = BTreeMap::new();
    for result in rdr.deserialize::<LedgerRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                debug!("Skipping malformed row: {}", e);
                continue;
            }
        };
        let Ok(kind) = record.kind.parse::<TransactionKind>() else {
            debug!("Skipping row with unknown type {:?}", record.kind);
            continue;
        };
        if record.amount <= 0 {
            debug!("Skipping row with amount {}", record.amount);
            continue;
        }

        let (balance, went_negative) = totals.entry(record.user).or_default();
        balance.record(kind, record.amount);
        *went_negative |= balance.net() < 0;
    }

    Ok(totals
        .into_iter()
        .map(|(user, (balance, went_negative))| ReplayRow {
            user,
            earned: balance.earned,
            spent: balance.spent,
            balance: balance.net(),
            went_negative,
        })
        .collect())
}

/// Writes replayed balances as CSV.
///
/// Columns: `user, earned, spent, balance, went_negative`
pub fn write_balances<W: Write>(rows: &[ReplayRow], writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn replays_single_user() {
        let csv = "user,type,amount,reason\n\
                   ada,bonus,20,Welcome credits\n\
                   ada,spent,8,Dinner\n\
                   ada,refund,8,Dinner cancelled\n";
        let rows = replay_ledger(Cursor::new(csv)).unwrap();
        assert_eq!(
            rows,
            vec![ReplayRow {
                user: "ada".into(),
                earned: 28,
                spent: 8,
                balance: 20,
                went_negative: false,
            }]
        );
    }

    #[test]
    fn flags_running_balance_below_zero() {
        let csv = "user,type,amount,reason\n\
                   bob,spent,5,Early spend\n\
                   bob,earned,10,Chores\n";
        let rows = replay_ledger(Cursor::new(csv)).unwrap();
        assert_eq!(rows[0].balance, 5);
        assert!(rows[0].went_negative);
    }

    #[test]
    fn skips_bad_rows() {
        let csv = "user,type,amount,reason\n\
                   ada,bonus,20,ok\n\
                   ada,teleport,5,unknown type\n\
                   ada,spent,-3,negative\n\
                   ada,spent,not-a-number,bad\n\
                   bob , deducted , 4 , trimmed\n";
        let rows = replay_ledger(Cursor::new(csv)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].balance, 20);
        assert_eq!(rows[1].user, "bob");
        assert_eq!(rows[1].spent, 4);
    }

    #[test]
    fn huge_amounts_saturate() {
        let csv = "user,type,amount\n\
                   ada,earned,9223372036854775807\n\
                   ada,bonus,20\n\
                   ada,spent,7\n";
        let rows = replay_ledger(Cursor::new(csv)).unwrap();
        assert_eq!(rows[0].earned, i64::MAX);
        assert_eq!(rows[0].balance, i64::MAX - 7);
        assert!(!rows[0].went_negative);
    }

    #[test]
    fn reason_column_is_optional() {
        let csv = "user,type,amount\nada,earned,3\n";
        let rows = replay_ledger(Cursor::new(csv)).unwrap();
        assert_eq!(rows[0].earned, 3);
    }

    #[test]
    fn writes_header_and_rows() {
        let rows = vec![ReplayRow {
            user: "ada".into(),
            earned: 10,
            spent: 4,
            balance: 6,
            went_negative: false,
        }];
        let mut output = Vec::new();
        write_balances(&rows, &mut output).unwrap();
        let output = String::from_utf8(output).unwrap();
        assert!(output.starts_with("user,earned,spent,balance,went_negative\n"));
        assert!(output.contains("ada,10,4,6,false"));
    }
}
