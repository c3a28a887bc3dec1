//! Replayable client workloads: one op per line, `GET k`, `PUT k v`, or
//! `APPEND k v`.

use std::error::Error;

type StdError = Box<dyn Error + Send + Sync + 'static>;

#[derive(Debug, Clone)]
pub enum Op {
    Get(String),
    Put(String, String),
    Append(String, String),
}

impl std::str::FromStr for Op {
    type Err = StdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sp: Vec<&str> = s.split_whitespace().collect();
        Ok(match &sp[..] {
            &["GET", k] => Op::Get(k.into()),
            &["PUT", k, v] => Op::Put(k.into(), v.into()),
            &["APPEND", k, v] => Op::Append(k.into(), v.into()),
            _ => Err(format!("Invalid line: {:?}", s))?,
        })
    }
}

/// Parse a trace file, skipping malformed lines.
pub fn ops(f: impl AsRef<std::path::Path>) -> Result<Vec<Op>, StdError> {
    use std::io::BufRead;
    let f = std::fs::File::open(f)?;
    let f = std::io::BufReader::new(f);
    Ok(f.lines().filter_map(|l| l.ok()?.parse().ok()).collect())
}
