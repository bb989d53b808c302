use std::collections::BTreeMap;

use tracing::{debug,info};

use super::error::Result;
use super::source::{WideTable,ReferenceTable,parse_count};


#[derive(Debug,Clone,PartialEq)]
pub struct CountryTotal {
    pub country: String,
    pub cases: f64,
}

#[derive(Debug,Clone,PartialEq)]
pub struct MapRow {
    pub country: String,
    pub alpha3: String,
    pub cases: f64,
    pub range: CasesRange,
}


/// Sum of every data row per country column, in column order. Note
/// that for cumulative inputs this sums the running total over all
/// dates rather than taking the last value.
pub fn country_totals(table: &WideTable) -> Result<Vec<CountryTotal>> {
    table.columns.iter().enumerate().map(|(i,country)| {
	let mut cases = 0.0;
	for cell in table.column(i) {
	    if let Some(v) = parse_count(cell)? {
		cases += v;
	    }
	}
	Ok(CountryTotal { country: country.clone(), cases })
    }).collect()
}


/// Cut a column name at the first "." (pandas-style duplicate suffix) or
/// just before the first "(" (the space preceding a qualifier).
pub fn normalize_name(name: &str) -> String {
    let mut prev = 0;
    for (i,c) in name.char_indices() {
	match c {
	    '.' => return name[..i].to_string(),
	    '(' => return name[..prev].to_string(),
	    _ => prev = i,
	}
    }
    name.to_string()
}


pub fn aggregate(totals: Vec<CountryTotal>) -> Vec<CountryTotal> {
    let mut grouped = BTreeMap::new();
    for total in totals {
	*grouped.entry(normalize_name(&total.country)).or_insert(0.0) += total.cases;
    }
    grouped.into_iter().map(
	|(country,cases)| CountryTotal { country, cases }
    ).collect()
}


#[derive(Debug,Clone,Copy,PartialEq,Eq,PartialOrd,Ord,Hash)]
pub enum CasesRange {
    Under50K,
    From50KTo200K,
    From200KTo800K,
    From800KTo1500K,
    Over1500K,
}

const RANGE_EDGES: [f64; 6] = [-150000.0, 50000.0, 200000.0, 800000.0, 1500000.0, 15000000.0];

impl CasesRange {

    pub const ALL: [CasesRange; 5] = [
	Self::Under50K,
	Self::From50KTo200K,
	Self::From200KTo800K,
	Self::From800KTo1500K,
	Self::Over1500K,
    ];

    /// Half-open buckets, exclusive lower and inclusive upper bound.
    pub fn of(cases: f64) -> Option<Self> {
	Self::ALL.iter().zip(RANGE_EDGES.windows(2))
	    .find(|(_,edges)| cases > edges[0] && cases <= edges[1])
	    .map(|(range,_)| *range)
    }

    pub fn label(&self) -> &'static str {
	match self {
	    Self::Under50K => "U50K",
	    Self::From50KTo200K => "50Kto200K",
	    Self::From200KTo800K => "200Kto800K",
	    Self::From800KTo1500K => "800Kto1.5M",
	    Self::Over1500K => "1.5M+",
	}
    }

    pub fn color(&self) -> &'static str {
	match self {
	    Self::Under50K => "white",
	    Self::From50KTo200K => "khaki",
	    Self::From200KTo800K => "yellow",
	    Self::From800KTo1500K => "orange",
	    Self::Over1500K => "red",
	}
    }

}


/// Reference-table spelling of a country name.
pub fn lookup_name(country: &str) -> String {
    let name = country.to_uppercase();
    match name.as_str() {
	"BRUNEI" => "BRUNEI DARUSSALAM".to_string(),
	"US" => "UNITED STATES".to_string(),
	_ => name,
    }
}


/// Countries that have both a bucket and an alpha-3 code. The others are
/// left off the map.
pub fn map_rows(world: &[CountryTotal], reference: &ReferenceTable) -> Vec<MapRow> {

    let mut dropped = 0;

    let rows = world.iter().filter_map(|total| {
	match (CasesRange::of(total.cases), reference.alpha3(&lookup_name(&total.country))) {
	    (Some(range), Some(alpha3)) => Some(MapRow {
		country: total.country.clone(),
		alpha3: alpha3.to_string(),
		cases: total.cases,
		range,
	    }),
	    (range, alpha3) => {
		debug!("Leaving {} off the map (range: {:?}, alpha-3: {:?})",
		       total.country, range, alpha3);
		dropped += 1;
		None
	    }
	}
    }).collect();

    if dropped > 0 {
	info!("{} of {} countries have no map entry", dropped, world.len());
    }

    rows

}


#[cfg(test)]
mod tests {
    use super::*;
    use super::super::source::{read_wide,read_reference};

    fn total(country: &str, cases: f64) -> CountryTotal {
	CountryTotal { country: country.to_string(), cases }
    }

    #[test]
    fn test_normalize_name() {
	assert_eq!(normalize_name("Australia.1"), "Australia");
	assert_eq!(normalize_name("France (Overseas)"), "France");
	assert_eq!(normalize_name("Korea, South"), "Korea, South");
	assert_eq!(normalize_name("(Unknown)"), "");
	assert_eq!(normalize_name("St. Kitts (x)"), "St");
    }

    #[test]
    fn test_normalize_name_idempotent() {
	for name in &["Australia.12", "France (Overseas)", "US", "Congo (Kinshasa)",
		      "Côte d'Ivoire", "a.b(c", "x(y.z", ""] {
	    let once = normalize_name(name);
	    assert_eq!(normalize_name(&once), once);
	}
    }

    #[test]
    fn test_aggregate_merges_subregions() {
	let world = aggregate(vec![total("France", 100.0), total("France (Overseas)", 5.0)]);
	assert_eq!(world, vec![total("France", 105.0)]);
    }

    #[test]
    fn test_unsplit_country_equals_column_sum() {
	let table = read_wide("Country/Region,Belgium,Australia,Australia.1\n\
			       Province/State,,Victoria,Tasmania\n\
			       1/23/20,1,2,3\n\
			       1/24/20,4,,6\n\
			       1/25/20,10,20,30\n").unwrap();
	let world = aggregate(country_totals(&table).unwrap());
	assert_eq!(world, vec![total("Australia", 61.0), total("Belgium", 15.0)]);
    }

    #[test]
    fn test_country_totals_fails_on_garbage() {
	let table = read_wide("Country/Region,Belgium\nProvince/State,\n1/23/20,lots\n").unwrap();
	assert!(country_totals(&table).is_err());
    }

    #[test]
    fn test_ranges_half_open() {
	assert_eq!(CasesRange::of(-150000.0), None);
	assert_eq!(CasesRange::of(-149999.0), Some(CasesRange::Under50K));
	assert_eq!(CasesRange::of(50000.0), Some(CasesRange::Under50K));
	assert_eq!(CasesRange::of(50000.5), Some(CasesRange::From50KTo200K));
	assert_eq!(CasesRange::of(200000.0), Some(CasesRange::From50KTo200K));
	assert_eq!(CasesRange::of(800000.0), Some(CasesRange::From200KTo800K));
	assert_eq!(CasesRange::of(1500000.0), Some(CasesRange::From800KTo1500K));
	assert_eq!(CasesRange::of(15000000.0), Some(CasesRange::Over1500K));
	assert_eq!(CasesRange::of(15000001.0), None);
	assert_eq!(CasesRange::of(f64::NAN), None);
    }

    #[test]
    fn test_ranges_disjoint() {
	for v in (-200000..16000000).step_by(12500) {
	    let v = v as f64;
	    let hits = CasesRange::ALL.iter().zip(RANGE_EDGES.windows(2))
		.filter(|(_,e)| v > e[0] && v <= e[1]).count();
	    assert!(hits <= 1);
	    assert_eq!(hits == 1, CasesRange::of(v).is_some());
	}
    }

    #[test]
    fn test_range_labels() {
	let labels: Vec<_> = CasesRange::ALL.iter().map(|r| r.label()).collect();
	assert_eq!(labels, vec!["U50K", "50Kto200K", "200Kto800K", "800Kto1.5M", "1.5M+"]);
	assert_eq!(CasesRange::Over1500K.color(), "red");
    }

    #[test]
    fn test_lookup_name_overrides() {
	assert_eq!(lookup_name("Brunei"), "BRUNEI DARUSSALAM");
	assert_eq!(lookup_name("US"), "UNITED STATES");
	assert_eq!(lookup_name("Belgium"), "BELGIUM");
    }

    #[test]
    fn test_map_rows_drops_unmatched() {
	let reference = read_reference("name,alpha-3\n\
					Brunei Darussalam,BRN\n\
					United States,USA\n\
					Belgium,BEL\n").unwrap();
	let world = vec![
	    total("Brunei", 10.0),
	    total("US", 2000000.0),
	    total("Belgium", 20000000.0),
	    total("Atlantis", 10.0),
	];
	let rows = map_rows(&world, &reference);
	assert_eq!(rows.len(), 2);
	assert_eq!(rows[0].alpha3, "BRN");
	assert_eq!(rows[0].range, CasesRange::Under50K);
	assert_eq!(rows[1].alpha3, "USA");
	assert_eq!(rows[1].range, CasesRange::Over1500K);
    }
}
