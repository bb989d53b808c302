use std::{io,fs};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::naive::NaiveDate;
use serde_json::{Value,json};
use tracing::info;

use super::error::Result;
use super::forecast::ForecastRow;
use super::world::{CasesRange,MapRow};


pub type Series = Vec<(NaiveDate,f64)>;
pub type Lines = Vec<(String,Series)>;


fn date_str(date: &NaiveDate) -> String {
    format!("{}", date.format("%Y-%m-%d"))
}


/// One line per named series, with point markers and a hover rule
/// showing every series at the hovered date.
pub fn daily_graph(graph_path: &Path, path: &str, title: &str, ytitle: &str,
		   data: &Lines) -> Result<()> {

    vega_page(graph_path, path, title, &json!({
	"$schema": "https://vega.github.io/schema/vega-lite/v4.json",
	"height": "container",
	"width": "container",
	"title": title,
	"data": {
	    "values": data.iter().flat_map(
		|(name,vals)| vals.iter().filter_map(
		    move |(date,val)| match val.is_finite() {
			false => None,
			true => Some(json!({
			    "Date": date_str(date),
			    "Series": name.to_string(),
			    "Value": val
			}))
		    })
	    ).collect::<Vec<_>>()
	},
	"layer": [
	    {
		"encoding": {
		    "color": {
			"field": "Series",
			"type": "nominal",
			"sort": data.iter().map(|(name,_)| name.as_str()).collect::<Vec<_>>()
		    },
		    "x": {
			"field": "Date",
			"timeUnit": "utcyearmonthdate",
			"title": "Date",
			"type": "temporal"
		    },
		    "y": {
			"field": "Value",
			"title": ytitle,
			"type": "quantitative"
		    }
		},
		"layer": [
		    {
			"mark": {"type": "line", "point": true},
			"selection": {
			    "Highlight": {"bind":"legend","type":"multi","fields":["Series"]},
			    "Grid": {"bind":"scales","type":"interval"}
			},
			"encoding": {
			    "opacity": {"value":0.2,"condition":{"value":1,"selection":"Highlight"}}
			}
		    }
		]
	    },
	    {
		"transform": [
		    {
			"groupby": ["Date"],
			"value": "Value",
			"pivot": "Series"
		    }
		],
		"mark": {
		    "color": "gray",
		    "tooltip": {"content":"data"},
		    "type": "rule"
		},
		"selection": {
		    "Hover": {
			"nearest": true,
			"empty": "none",
			"clear": "mouseout",
			"type": "single",
			"on": "mouseover",
			"fields": ["Date"]
		    }
		},
		"encoding": {
		    "opacity": {
			"value": 0,
			"condition": {"value": 1, "selection": "Hover"}
		    },
		    "x": {
			"field": "Date",
			"type": "temporal"
		    },
		    "tooltip": vec![
			json!({"field":"Date","type":"temporal"})
		    ].into_iter().chain(data.iter().map(
			|(name,_)| json!({"field":name,"format":".1f","type":"quantitative"})
		    )).collect::<Vec<_>>()
		}
	    }
	]
    }))

}


/// World choropleth, one trace per bucket so the legend lists the
/// ranges in order.
pub fn world_map(graph_path: &Path, path: &str, title: &str, rows: &[MapRow]) -> Result<()> {

    let traces: Vec<Value> = CasesRange::ALL.iter().filter_map(|range| {
	let rows: Vec<&MapRow> = rows.iter().filter(|row| row.range == *range).collect();
	match rows.is_empty() {
	    true => None,
	    false => Some(json!({
		"type": "choropleth",
		"name": range.label(),
		"locationmode": "ISO-3",
		"locations": rows.iter().map(|row| row.alpha3.as_str()).collect::<Vec<_>>(),
		"z": rows.iter().map(|_| 1).collect::<Vec<_>>(),
		"text": rows.iter().map(|row| row.country.as_str()).collect::<Vec<_>>(),
		"customdata": rows.iter().map(|row| row.cases).collect::<Vec<_>>(),
		"hovertemplate": format!("%{{text}}<br>%{{customdata:,.0f}}<extra>{}</extra>",
					 range.label()),
		"colorscale": [[0, range.color()], [1, range.color()]],
		"showscale": false,
		"showlegend": true,
		"marker": {"line": {"color": "gray", "width": 0.5}}
	    }))
	}
    }).collect();

    plotly_page(graph_path, path, title, &json!(traces), &json!({
	"geo": {
	    "projection": {"type": "mercator"},
	    "fitbounds": "locations",
	    "visible": false
	},
	"legend": {"title": {"text": "Cases Range"}},
	"margin": {"r": 0, "t": 0, "l": 0, "b": 0}
    }))

}


/// Full fitted curve over history and future with its uncertainty band,
/// the observed values drawn as points.
pub fn forecast_graph(graph_path: &Path, path: &str, title: &str, xtitle: &str,
		      ytitle: &str, history: &Series, forecast: &[ForecastRow]) -> Result<()> {

    vega_page(graph_path, path, title, &json!({
	"$schema": "https://vega.github.io/schema/vega-lite/v4.json",
	"height": "container",
	"width": "container",
	"title": title,
	"encoding": {
	    "x": {
		"field": "date",
		"timeUnit": "utcyearmonthdate",
		"title": xtitle,
		"type": "temporal"
	    }
	},
	"layer": [
	    {
		"data": {"values": serde_json::to_value(forecast)?},
		"layer": [
		    {
			"mark": {"type": "area", "color": "#0072B2", "opacity": 0.2},
			"encoding": {
			    "y": {"field": "yhat_lower", "type": "quantitative", "title": ytitle},
			    "y2": {"field": "yhat_upper"}
			}
		    },
		    {
			"mark": {"type": "line", "color": "#0072B2"},
			"selection": {
			    "Grid": {"bind":"scales","type":"interval"}
			},
			"encoding": {
			    "y": {"field": "yhat", "type": "quantitative"},
			    "tooltip": [
				{"field": "date", "type": "temporal"},
				{"field": "yhat", "type": "quantitative", "format": ".1f"},
				{"field": "yhat_lower", "type": "quantitative", "format": ".1f"},
				{"field": "yhat_upper", "type": "quantitative", "format": ".1f"}
			    ]
			}
		    }
		]
	    },
	    {
		"data": {
		    "values": history.iter().filter(|(_,y)| y.is_finite()).map(
			|(date,y)| json!({"date": date_str(date), "y": y})
		    ).collect::<Vec<_>>()
		},
		"mark": {"type": "point", "color": "black", "size": 10, "filled": true},
		"encoding": {
		    "y": {"field": "y", "type": "quantitative"}
		}
	    }
	]
    }))

}


/// Trend over time above the weekly profile.
pub fn components_graph(graph_path: &Path, path: &str, title: &str,
			forecast: &[ForecastRow], weekly: &[(String,f64)]) -> Result<()> {

    vega_page(graph_path, path, title, &json!({
	"$schema": "https://vega.github.io/schema/vega-lite/v4.json",
	"title": title,
	"vconcat": [
	    {
		"width": 800,
		"height": 250,
		"data": {"values": serde_json::to_value(forecast)?},
		"mark": {"type": "line", "color": "#0072B2"},
		"encoding": {
		    "x": {"field": "date", "timeUnit": "utcyearmonthdate",
			  "title": "ds", "type": "temporal"},
		    "y": {"field": "trend", "title": "trend", "type": "quantitative"}
		}
	    },
	    {
		"width": 800,
		"height": 250,
		"data": {
		    "values": weekly.iter().map(
			|(day,v)| json!({"Day": day, "weekly": v})
		    ).collect::<Vec<_>>()
		},
		"mark": {"type": "line", "color": "#0072B2", "point": true},
		"encoding": {
		    "x": {"field": "Day", "title": "Day of week", "type": "ordinal",
			  "sort": weekly.iter().map(|(day,_)| day.as_str()).collect::<Vec<_>>()},
		    "y": {"field": "weekly", "title": "weekly", "type": "quantitative"}
		}
	    }
	]
    }))

}


/// Only the future rows: point estimates and the shaded bound.
pub fn future_graph(graph_path: &Path, path: &str, title: &str,
		    forecast: &[ForecastRow]) -> Result<()> {

    vega_page(graph_path, path, title, &json!({
	"$schema": "https://vega.github.io/schema/vega-lite/v4.json",
	"height": "container",
	"width": "container",
	"title": title,
	"data": {"values": serde_json::to_value(forecast)?},
	"encoding": {
	    "x": {
		"field": "date",
		"timeUnit": "utcyearmonthdate",
		"title": "Date",
		"type": "temporal"
	    }
	},
	"layer": [
	    {
		"mark": {"type": "area"},
		"encoding": {
		    "y": {"field": "yhat_lower", "type": "quantitative", "title": "Cases"},
		    "y2": {"field": "yhat_upper"},
		    "color": {"datum": "Bound"}
		}
	    },
	    {
		"mark": {"type": "line", "point": true},
		"encoding": {
		    "y": {"field": "yhat", "type": "quantitative"},
		    "color": {"datum": "forecast"},
		    "tooltip": [
			{"field": "date", "type": "temporal"},
			{"field": "yhat", "type": "quantitative", "format": ".1f"},
			{"field": "yhat_lower", "type": "quantitative", "format": ".1f"},
			{"field": "yhat_upper", "type": "quantitative", "format": ".1f"}
		    ]
		}
	    }
	],
	"config": {
	    "range": {"category": ["#1f77b4", "gray"]},
	    "legend": {"orient": "top-left"}
	}
    }))

}


fn vega_page(graph_path: &Path, path: &str, title: &str, spec: &Value) -> Result<()> {

    fs::create_dir_all(graph_path)?;
    let mut out = io::BufWriter::new(File::create(graph_path.join(path))?);

    write!(out, "<!DOCTYPE html><html><head>")?;
    write!(out, "<meta charset=\"UTF-8\">")?;
    write!(out, "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">")?;
    write!(out, "<title>{}</title>", title)?;
    write!(out, "<script src=\"https://cdn.jsdelivr.net/npm/vega@5\"></script>")?;
    write!(out, "<script src=\"https://cdn.jsdelivr.net/npm/vega-lite@4\"></script>")?;
    write!(out, "<script src=\"https://cdn.jsdelivr.net/npm/vega-embed\"></script>")?;
    write!(out, "</head>")?;
    write!(out, "<body>")?;
    write!(out, "<div id=\"vis\" style=\"overflow: hidden; position: absolute;top: 0; left: 0; right: 0; bottom: 0;\"></div>")?;
    write!(out, "<script type=\"text/javascript\">")?;
    write!(out, "var spec = ")?;
    serde_json::to_writer_pretty(out.by_ref(), spec)?;
    write!(out, ";vegaEmbed('#vis', spec,{{}}).then(function(result) {{")?;
    write!(out, "}}).catch(console.error);")?;
    write!(out, "</script>")?;
    write!(out, "</body></html>")?;
    out.flush()?;

    info!("Wrote {}", graph_path.join(path).display());
    Ok(())

}


fn plotly_page(graph_path: &Path, path: &str, title: &str,
	       data: &Value, layout: &Value) -> Result<()> {

    fs::create_dir_all(graph_path)?;
    let mut out = io::BufWriter::new(File::create(graph_path.join(path))?);

    write!(out, "<!DOCTYPE html><html><head>")?;
    write!(out, "<meta charset=\"UTF-8\">")?;
    write!(out, "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">")?;
    write!(out, "<title>{}</title>", title)?;
    write!(out, "<script src=\"https://cdn.plot.ly/plotly-2.27.0.min.js\"></script>")?;
    write!(out, "</head>")?;
    write!(out, "<body>")?;
    write!(out, "<div id=\"vis\" style=\"overflow: hidden; position: absolute;top: 0; left: 0; right: 0; bottom: 0;\"></div>")?;
    write!(out, "<script type=\"text/javascript\">")?;
    write!(out, "var data = ")?;
    serde_json::to_writer(out.by_ref(), data)?;
    write!(out, ";var layout = ")?;
    serde_json::to_writer(out.by_ref(), layout)?;
    write!(out, ";Plotly.newPlot('vis', data, layout, {{responsive: true}});")?;
    write!(out, "</script>")?;
    write!(out, "</body></html>")?;
    out.flush()?;

    info!("Wrote {}", graph_path.join(path).display());
    Ok(())

}


#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
	NaiveDate::from_ymd_opt(2020, 4, d).unwrap()
    }

    fn spec_of(html: &str, prefix: &str, suffix: &str) -> Value {
	let start = html.find(prefix).unwrap() + prefix.len();
	let end = start + html[start..].find(suffix).unwrap();
	serde_json::from_str(&html[start..end]).unwrap()
    }

    fn row(d: u32, yhat: f64) -> ForecastRow {
	ForecastRow {
	    date: date(d), trend: yhat, weekly: 0.0, yhat,
	    yhat_lower: yhat - 1.0, yhat_upper: yhat + 1.0,
	}
    }

    #[test]
    fn test_daily_graph_skips_nan() {
	let dir = tempfile::tempdir().unwrap();
	let data = vec![
	    ("daily cases".to_string(), vec![(date(1), 1.0), (date(2), 2.0)]),
	    ("MA5".to_string(), vec![(date(1), f64::NAN), (date(2), 1.5)]),
	];
	daily_graph(dir.path(), "daily-cases.html", "Daily Covid19 Cases in World",
		    "Cases", &data).unwrap();
	let html = fs::read_to_string(dir.path().join("daily-cases.html")).unwrap();
	assert!(html.contains("<title>Daily Covid19 Cases in World</title>"));
	let spec = spec_of(&html, "var spec = ", ";vegaEmbed");
	let values = spec["data"]["values"].as_array().unwrap();
	assert_eq!(values.len(), 3);
	assert_eq!(values[2], json!({"Date": "2020-04-02", "Series": "MA5", "Value": 1.5}));
    }

    #[test]
    fn test_world_map_traces_per_range() {
	let dir = tempfile::tempdir().unwrap();
	let rows = vec![
	    MapRow { country: "Belgium".into(), alpha3: "BEL".into(), cases: 10.0,
		     range: CasesRange::Under50K },
	    MapRow { country: "US".into(), alpha3: "USA".into(), cases: 2e6,
		     range: CasesRange::Over1500K },
	    MapRow { country: "France".into(), alpha3: "FRA".into(), cases: 20.0,
		     range: CasesRange::Under50K },
	];
	world_map(dir.path(), "world.html", "World", &rows).unwrap();
	let html = fs::read_to_string(dir.path().join("world.html")).unwrap();
	let data = spec_of(&html, "var data = ", ";var layout");
	let traces = data.as_array().unwrap();
	assert_eq!(traces.len(), 2);
	assert_eq!(traces[0]["name"], "U50K");
	assert_eq!(traces[0]["locations"], json!(["BEL", "FRA"]));
	assert_eq!(traces[1]["name"], "1.5M+");
	assert_eq!(traces[1]["colorscale"][0][1], "red");
	let layout = spec_of(&html, ";var layout = ", ";Plotly");
	assert_eq!(layout["geo"]["projection"]["type"], "mercator");
    }

    #[test]
    fn test_future_graph_rows() {
	let dir = tempfile::tempdir().unwrap();
	let rows = vec![row(1, 10.0), row(2, 11.0)];
	future_graph(dir.path(), "future.html", "Forecasting of Next 2 Days Cases", &rows).unwrap();
	let html = fs::read_to_string(dir.path().join("future.html")).unwrap();
	let spec = spec_of(&html, "var spec = ", ";vegaEmbed");
	assert_eq!(spec["data"]["values"][1]["date"], "2020-04-02");
	assert_eq!(spec["data"]["values"][1]["yhat_upper"], 12.0);
	assert_eq!(spec["layer"][0]["encoding"]["color"]["datum"], "Bound");
    }

    #[test]
    fn test_forecast_and_components_graphs() {
	let dir = tempfile::tempdir().unwrap();
	let rows = vec![row(1, 10.0), row(2, 11.0), row(3, 12.0)];
	let history = vec![(date(1), 9.5), (date(2), 11.5)];
	forecast_graph(dir.path(), "forecast.html", "Forecast", "Date", "Cases",
		       &history, &rows).unwrap();
	let weekly: Vec<(String,f64)> = vec![("Monday".into(), 1.0), ("Tuesday".into(), -1.0)];
	components_graph(dir.path(), "components.html", "Components", &rows, &weekly).unwrap();
	let html = fs::read_to_string(dir.path().join("forecast.html")).unwrap();
	let spec = spec_of(&html, "var spec = ", ";vegaEmbed");
	assert_eq!(spec["layer"][1]["data"]["values"].as_array().unwrap().len(), 2);
	let html = fs::read_to_string(dir.path().join("components.html")).unwrap();
	let spec = spec_of(&html, "var spec = ", ";vegaEmbed");
	assert_eq!(spec["vconcat"][1]["encoding"]["x"]["sort"], json!(["Monday", "Tuesday"]));
    }
}
