//! InvertirOnline history, scraped through an external driver.
//!
//! The configured command is invoked as `<command> <TICKER> <START> <END>`
//! (dates `YYYY-MM-DD`) and must print CSV on stdout with the columns
//! `date,open,high,low,close,adj_close,volume_amount,volume_nominal`.
//! Numbers may carry thousands separators; dates are `MM/DD/YYYY` or
//! `DD/MM/YYYY`.

use crate::domain::error::FetchError;
use crate::domain::ohlcv::{DateRange, OhlcvBar};
use crate::domain::settings::SourceSettings;
use crate::domain::source::SourceId;
use crate::ports::source_port::SourceAdapter;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DATE_FORMATS: [&str; 2] = ["%m/%d/%Y", "%d/%m/%Y"];

pub struct IolSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl IolSource {
    /// `None` when no driver command is configured.
    pub fn from_settings(settings: &SourceSettings) -> Option<Self> {
        let command = settings.command.as_deref()?;
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            timeout: settings.timeout,
        })
    }

    fn wait(&self, child: &mut Child) -> Result<std::process::ExitStatus, FetchError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(FetchError::Timeout {
                        seconds: self.timeout.as_secs(),
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return Err(FetchError::Unavailable {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut out);
        }
        out
    })
}

fn parse_number(raw: &str) -> f64 {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() || cleaned == "-" {
        return 0.0;
    }
    cleaned.parse().unwrap_or(0.0)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Parses driver output. Rows without a usable date, or with all prices at
/// zero, are skipped.
fn parse_csv(text: &str, ticker: &str) -> Result<Vec<OhlcvBar>, FetchError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut seen: HashMap<NaiveDate, u32> = HashMap::new();
    let mut bars = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| FetchError::ParseError {
            reason: e.to_string(),
        })?;
        if record.len() < 5 {
            warn!(%ticker, row = ?record, "short row from driver");
            continue;
        }
        let Some(date) = parse_date(&record[0]) else {
            warn!(%ticker, value = &record[0], "unparseable date from driver");
            continue;
        };
        let (open, high, low, close) = (
            parse_number(&record[1]),
            parse_number(&record[2]),
            parse_number(&record[3]),
            parse_number(&record[4]),
        );
        if open == 0.0 && high == 0.0 && low == 0.0 && close == 0.0 {
            continue;
        }
        let volume = record.get(7).map(parse_number).unwrap_or(0.0);
        let row_index = seen.entry(date).or_insert(0);
        bars.push(OhlcvBar {
            ticker: ticker.to_string(),
            date,
            open,
            high,
            low,
            close,
            volume: volume as i64,
            source: SourceId::Iol,
            row_index: *row_index,
        });
        *row_index += 1;
    }
    Ok(bars)
}

impl SourceAdapter for IolSource {
    fn id(&self) -> SourceId {
        SourceId::Iol
    }

    fn fetch(&self, ticker: &str, range: DateRange) -> Result<Vec<OhlcvBar>, FetchError> {
        debug!(program = %self.program, %ticker, "spawning driver");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(ticker)
            .arg(range.start.format("%Y-%m-%d").to_string())
            .arg(range.end.format("%Y-%m-%d").to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FetchError::Unavailable {
                reason: format!("failed to start {}: {e}", self.program),
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = self.wait(&mut child)?;

        let out = stdout.join().unwrap_or_default();
        let err = stderr.join().unwrap_or_default();
        if !status.success() {
            let reason = err
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("driver exited with {status}"));
            return Err(FetchError::Unavailable { reason });
        }

        let mut bars = parse_csv(&out, ticker)?;
        bars.retain(|b| range.contains(b.date));
        Ok(bars)
    }
}
