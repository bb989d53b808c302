mod graph;
mod error;
mod source;
mod world;
mod trend;
mod forecast;

use std::fs;
use std::path::{Path,PathBuf};

use clap::Parser;
use tracing::{debug,info};
use tracing_subscriber::{EnvFilter,FmtSubscriber};

use error::Result;
use forecast::{Forecaster,Frequency,ModelConfig};
use graph::Series;
use source::{WideTable,ReferenceTable};
use trend::DailyFrame;


/// Global COVID-19 report: world map of case totals, daily world cases
/// and deaths, and a forecast of the coming days.
///
/// Inputs may be local files or http(s) URLs; downloads are cached.
#[derive(Parser,Debug,Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Wide CSV of cases, dates by country
    #[arg(long, value_name = "FILE|URL", env = "COVID_CASES",
	  default_value = "CONVENIENT_global_confirmed_cases.csv")]
    cases: String,

    /// Wide CSV of deaths, dates by country
    #[arg(long, value_name = "FILE|URL", env = "COVID_DEATHS",
	  default_value = "CONVENIENT_global_deaths.csv")]
    deaths: String,

    /// Country reference table with `name` and `alpha-3` columns
    #[arg(long, value_name = "FILE|URL", env = "COVID_REFERENCE",
	  default_value = "continents2.csv")]
    reference: String,

    /// Output directory for the graphs
    #[arg(long, value_name = "DIR", env = "COVID_GRAPHS", default_value = "graphs")]
    graphs: PathBuf,

    /// Download cache directory
    #[arg(long, value_name = "DIR", env = "COVID_CACHE", default_value = "cache")]
    cache: PathBuf,

    /// Number of steps to forecast
    #[arg(long, default_value = "30")]
    periods: usize,

    /// Forecast step, D (daily) or W (weekly)
    #[arg(long, default_value = "D")]
    freq: Frequency,

    /// Moving average window of the daily graphs
    #[arg(long, default_value = "5")]
    window: usize,

    /// Enable debug output
    #[arg(short, long)]
    verbose: bool,
}


fn main() -> Result<()> {

    let args = Args::parse();
    init_logging(args.verbose);
    debug!("Arguments: {:?}", args);

    fs::create_dir_all(&args.graphs)?;

    let cases = source::read_wide(&source::fetch(&args.cases, &args.cache)?)?;
    let deaths = source::read_wide(&source::fetch(&args.deaths, &args.cache)?)?;
    let reference = source::read_reference(&source::fetch(&args.reference, &args.cache)?)?;
    info!("Loaded {} countries x {} dates, {} reference entries",
	  cases.columns.len(), cases.rows.len().saturating_sub(1), reference.len());

    world_graphs(&args.graphs, &cases, &reference)?;
    let frame = daily_graphs(&args.graphs, &cases, &deaths, args.window)?;
    forecast_graphs(&args.graphs, &frame, args.periods, args.freq)?;

    Ok(())

}


fn init_logging(verbose: bool) {
    let level = match verbose {
	true => "debug",
	false => "info",
    };
    let subscriber = FmtSubscriber::builder()
	.with_env_filter(EnvFilter::try_from_default_env()
			 .unwrap_or_else(|_| EnvFilter::new(level)))
	.with_target(false)
	.with_thread_ids(false)
	.with_file(false)
	.with_line_number(false)
	.compact()
	.finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
	eprintln!("Warning: could not set up logging: {}", err);
    }
}


fn world_graphs(graph_path: &Path, cases: &WideTable, reference: &ReferenceTable) -> Result<()> {
    let world = world::aggregate(world::country_totals(cases)?);
    info!("Aggregated {} columns into {} countries", cases.columns.len(), world.len());
    graph::world_map(graph_path, "world-cases.html", "Covid19 Cases in World",
		     &world::map_rows(&world, reference))
}


fn daily_graphs(graph_path: &Path, cases: &WideTable, deaths: &WideTable,
		window: usize) -> Result<Vec<DailyFrame>> {

    let frame = trend::daily_frame(&trend::daily_totals(cases)?,
				   &trend::daily_totals(deaths)?)?;
    let average = format!("MA{}", window);

    let cases: Series = frame.iter().map(|d| (d.date, d.cases)).collect();
    graph::daily_graph(graph_path, "daily-cases.html", "Daily Covid19 Cases in World", "Cases",
		       &vec![("daily cases".to_string(), cases.clone()),
			     (average.clone(), trend::smooth(&cases, window))])?;

    let deaths: Series = frame.iter().map(|d| (d.date, d.deaths)).collect();
    graph::daily_graph(graph_path, "daily-deaths.html", "Daily Covid19 Deaths in World", "Deaths",
		       &vec![("daily deaths".to_string(), deaths.clone()),
			     (average, trend::smooth(&deaths, window))])?;

    Ok(frame)

}


fn forecast_graphs(graph_path: &Path, frame: &[DailyFrame], periods: usize,
		   freq: Frequency) -> Result<()> {

    let mut model = Forecaster::new(ModelConfig::default());
    model.fit(frame.iter().map(|d| (d.date, d.cases)).collect())?;
    model.forecast(periods, freq)?;

    let r2 = model.r2()?;
    info!("In-sample fit R2: {:.4}", r2);
    println!("Model R2 Score: {}", r2);

    model.plot(graph_path, "Date", "Cases")?;
    graph::future_graph(graph_path, "forecast-next.html",
			&format!("Forecasting of Next {} {} Cases", periods, freq.unit()),
			model.tail(periods)?)

}


#[cfg(test)]
mod tests {
    use super::*;

    fn wide(scale: f64) -> String {
	let mut text = String::from("Country/Region,Belgium,France,France (Overseas),US\n\
				     Province/State,,,,\n");
	for day in 1..=30 {
	    let v = day as f64 * scale;
	    text.push_str(&format!("4/{}/20,{},{},{},{}\n", day, v, 2.0 * v, 1.0, 10.0 * v));
	}
	text
    }

    #[test]
    fn test_stages_write_all_graphs() {
	let dir = tempfile::tempdir().unwrap();
	let cases = source::read_wide(&wide(100.0)).unwrap();
	let deaths = source::read_wide(&wide(1.0)).unwrap();
	let reference = source::read_reference("name,alpha-3\n\
						 Belgium,BEL\n\
						 France,FRA\n\
						 United States,USA\n").unwrap();

	world_graphs(dir.path(), &cases, &reference).unwrap();
	let frame = daily_graphs(dir.path(), &cases, &deaths, 5).unwrap();
	assert_eq!(frame.len(), 30);
	forecast_graphs(dir.path(), &frame, 30, Frequency::Daily).unwrap();

	for file in &["world-cases.html", "daily-cases.html", "daily-deaths.html",
		      "forecast.html", "forecast-components.html", "forecast-next.html"] {
	    assert!(dir.path().join(file).exists(), "missing {}", file);
	}
	let world = fs::read_to_string(dir.path().join("world-cases.html")).unwrap();
	assert!(world.contains("\"USA\""));
	let next = fs::read_to_string(dir.path().join("forecast-next.html")).unwrap();
	assert!(next.contains("Forecasting of Next 30 Days Cases"));
    }

    #[test]
    fn test_stages_reject_mismatched_tables() {
	let dir = tempfile::tempdir().unwrap();
	let cases = source::read_wide(&wide(100.0)).unwrap();
	let deaths = source::read_wide("Country/Region,Belgium\nProvince/State,\n4/1/20,1\n").unwrap();
	assert!(daily_graphs(dir.path(), &cases, &deaths, 5).is_err());
    }
}
