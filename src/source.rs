use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::naive::NaiveDate;
use encoding_rs::mem::decode_latin1;
use tracing::{debug,info};

use super::error::{Result,Error};


const CACHE_MAX_AGE: Duration = Duration::from_secs(1800);


/// A date x country matrix as published in the "convenient" CSSE exports:
/// the first column holds a row label, every other header is a country.
/// Headers are kept as-is, duplicates included.
#[derive(Debug,Clone)]
pub struct WideTable {
    pub columns: Vec<String>,
    pub labels: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl WideTable {

    /// Rows below the sub-header (province/state) row.
    pub fn data_rows(&self) -> impl Iterator<Item = (&str, &[String])> {
	self.labels.iter().zip(self.rows.iter()).skip(1)
	    .map(|(label,row)| (label.as_str(), row.as_slice()))
    }

    pub fn column(&self, index: usize) -> impl Iterator<Item = &str> {
	self.rows.iter().skip(1).map(move |row| row[index].as_str())
    }

}


/// Country name (upper-cased) to ISO alpha-3, in file order.
#[derive(Debug,Clone,Default)]
pub struct ReferenceTable {
    entries: Vec<(String,Option<String>)>,
}

impl ReferenceTable {

    pub fn new(entries: Vec<(String,Option<String>)>) -> Self {
	Self { entries }
    }

    /// First matching entry wins; a match without a code counts as a miss.
    pub fn alpha3(&self, name: &str) -> Option<&str> {
	self.entries.iter().find(|(n,_)| n == name)
	    .and_then(|(_,code)| code.as_deref())
    }

    pub fn len(&self) -> usize {
	self.entries.len()
    }

}


pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}


/// Read an input either from disk or, for URLs, from the download cache.
pub fn fetch(input: &str, cache_path: &Path) -> Result<String> {

    if !is_url(input) {
	debug!("Reading {}", input);
	return Ok(decode(fs::read(input)?));
    }

    let cache_file = cache_path.join(cache_name(input));

    if is_fresh(&cache_file)? {
	debug!("Using cached {}", cache_file.display());
	return Ok(decode(fs::read(&cache_file)?));
    }

    let data = download(input)?;
    fs::create_dir_all(cache_path)?;
    fs::write(&cache_file, &data)?;
    Ok(decode(data))

}


fn download(url: &str) -> Result<Vec<u8>> {
    info!("Downloading {}...", url);
    let res = reqwest::blocking::get(url)?;
    match res.status().as_u16() {
	200 => Ok(res.bytes()?.to_vec()),
	_ => Err(Error::HttpError(res.status())),
    }
}


/// A cache file stamped in the future counts as stale.
fn is_fresh(cache_file: &Path) -> Result<bool> {
    if !cache_file.exists() {
	return Ok(false);
    }
    Ok(fs::metadata(cache_file)?.modified()?.elapsed()
       .map_or(false, |age| age < CACHE_MAX_AGE))
}


/// Host, directories and query flattened into a prefix, the file name
/// kept at the end.
fn cache_name(url: &str) -> String {
    let url = url.split('#').next().unwrap_or("");
    let url = url.split_once("://").map_or(url, |(_,rest)| rest);
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let (dir, base) = path.rsplit_once('/').unwrap_or((path, ""));
    let base = match base {
	"" => "download.csv",
	base => base,
    };
    let prefix = match query {
	"" => dir.to_string(),
	query => format!("{}?{}", dir, query),
    };
    format!("{}_{}", flatten(&prefix), flatten(base))
}


fn flatten(part: &str) -> String {
    part.chars().map(|c| match c.is_ascii_alphanumeric() || c == '.' || c == '-' {
	true => c,
	false => '_',
    }).collect()
}


/// Inputs are expected in UTF-8, some mirrors serve Latin-1.
pub fn decode(bytes: Vec<u8>) -> String {
    let text = match String::from_utf8(bytes) {
	Ok(text) => text,
	Err(err) => decode_latin1(err.as_bytes()).into_owned(),
    };
    match text.strip_prefix('\u{feff}') {
	Some(stripped) => stripped.to_string(),
	None => text,
    }
}


pub fn read_wide(text: &str) -> Result<WideTable> {

    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let columns = reader.headers()?.iter().skip(1)
	.map(|h| h.to_string()).collect();

    let mut labels = Vec::new();
    let mut rows = Vec::new();

    for record in reader.records() {
	let record = record?;
	labels.push(record.get(0).unwrap_or("").to_string());
	rows.push(record.iter().skip(1).map(|c| c.to_string()).collect());
    }

    Ok(WideTable { columns, labels, rows })

}


pub fn read_reference(text: &str) -> Result<ReferenceTable> {

    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();
    let name = headers.iter().position(|h| h.trim() == "name")
	.ok_or(Error::MissingColumn("name"))?;
    let alpha3 = headers.iter().position(|h| h.trim() == "alpha-3")
	.ok_or(Error::MissingColumn("alpha-3"))?;

    Ok(ReferenceTable::new(reader.records().map(|record| {
	let record = record?;
	let code = record.get(alpha3).unwrap_or("").trim();
	Ok((record.get(name).unwrap_or("").to_uppercase(),
	    match code.is_empty() {
		true => None,
		false => Some(code.to_string()),
	    }))
    }).collect::<Result<_>>()?))

}


/// Empty cells are missing values; anything else must be a number.
pub fn parse_count(cell: &str) -> Result<Option<f64>> {
    match cell.trim() {
	"" => Ok(None),
	cell => Ok(Some(cell.parse()?)),
    }
}


pub fn parse_date(label: &str) -> Result<NaiveDate> {
    let label = label.trim();
    NaiveDate::parse_from_str(label, "%m/%d/%y")
	.or_else(|_| NaiveDate::parse_from_str(label, "%m/%d/%Y"))
	.or_else(|_| NaiveDate::parse_from_str(label, "%Y-%m-%d"))
	.map_err(Error::from)
}
