use chrono::naive::NaiveDate;

use super::error::{Result,Error};
use super::graph::Series;
use super::source::{WideTable,parse_count,parse_date};


#[derive(Debug,Clone,Copy,PartialEq)]
pub struct DailyFrame {
    pub date: NaiveDate,
    pub cases: f64,
    pub deaths: f64,
}


/// World total per date row: the sum over all country columns.
pub fn daily_totals(table: &WideTable) -> Result<Series> {
    table.data_rows().map(|(label,row)| {
	let date = parse_date(label)?;
	let mut sum = 0.0;
	for cell in row {
	    if let Some(v) = parse_count(cell)? {
		sum += v;
	    }
	}
	Ok((date, sum))
    }).collect()
}


/// Rows are paired by position, the dates of the cases table are kept.
pub fn daily_frame(cases: &Series, deaths: &Series) -> Result<Vec<DailyFrame>> {
    if cases.len() != deaths.len() {
	return Err(Error::MismatchedLength(cases.len(), deaths.len()));
    }
    Ok(cases.iter().zip(deaths.iter()).map(
	|((date,cases),(_,deaths))| DailyFrame { date: *date, cases: *cases, deaths: *deaths }
    ).collect())
}


/// Trailing mean over `window` points, NaN until the window is full.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let mut sum = 0.0;
    (0..values.len()).map(|i| {
	sum += values[i] - if i >= window {values[i-window]} else {0.0};
	match window > 0 && i + 1 >= window {
	    true => sum / window as f64,
	    false => f64::NAN,
	}
    }).collect()
}


pub fn smooth(data: &Series, window: usize) -> Series {
    let values: Vec<f64> = data.iter().map(|(_,v)| *v).collect();
    data.iter().zip(rolling_mean(&values, window)).map(
	|((date,_),avg)| (*date, avg)
    ).collect()
}
