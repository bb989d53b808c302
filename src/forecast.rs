use std::f64::consts::PI;
use std::path::Path;
use std::str::FromStr;

use chrono::{Duration,NaiveDate};
use nalgebra::{DMatrix,DVector};
use serde::Serialize;
use tracing::debug;

use super::error::{Result,Error};
use super::graph::{self,Series};


const WEEKLY_PERIOD: f64 = 7.0;
const WEEKLY_ORDER: usize = 3;
const FIT_PASSES: usize = 5;
const MIN_NOISE_VARIANCE: f64 = 1e-6;


/// Settings of the additive model. Only weekly seasonality is modelled,
/// daily and yearly components are always off.
#[derive(Debug,Clone)]
pub struct ModelConfig {
    pub n_changepoints: usize,
    pub changepoint_range: f64,
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub trend_prior_scale: f64,
    pub interval_width: f64,
    pub weekly_seasonality: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
	Self {
	    n_changepoints: 25,
	    changepoint_range: 0.8,
	    changepoint_prior_scale: 0.05,
	    seasonality_prior_scale: 10.0,
	    trend_prior_scale: 5.0,
	    interval_width: 0.8,
	    weekly_seasonality: true,
	}
    }
}


#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum Frequency {
    Daily,
    Weekly,
}

impl Frequency {

    pub fn step(&self) -> Duration {
	match self {
	    Self::Daily => Duration::days(1),
	    Self::Weekly => Duration::days(7),
	}
    }

    pub fn unit(&self) -> &'static str {
	match self {
	    Self::Daily => "Days",
	    Self::Weekly => "Weeks",
	}
    }

}

impl FromStr for Frequency {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
	match s {
	    "D" | "d" => Ok(Self::Daily),
	    "W" | "w" => Ok(Self::Weekly),
	    other => Err(Error::UnknownFrequency(other.to_string())),
	}
    }
}


#[derive(Debug,Clone,PartialEq,Serialize)]
pub struct ForecastRow {
    pub date: NaiveDate,
    pub trend: f64,
    pub weekly: f64,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
}


/// Piecewise linear trend plus weekly Fourier terms, fitted by
/// penalized least squares on a scaled copy of the history.
///
/// Time is scaled to [0, 1] over the history and values are divided by
/// their largest absolute value. Coefficients are laid out as
/// `[m, k, delta_1..delta_S, seasonal...]`.
#[derive(Debug,Clone)]
pub struct Model {
    config: ModelConfig,
    dates: Vec<NaiveDate>,
    start: NaiveDate,
    span: f64,
    scale: f64,
    changepoints: Vec<f64>,
    beta: DVector<f64>,
    sigma_obs: f64,
}

impl Model {

    pub fn fit(history: &Series, config: ModelConfig) -> Result<Self> {

	if history.len() < 2 {
	    return Err(Error::NotEnoughData);
	}
	if history.windows(2).any(|w| w[1].0 <= w[0].0) {
	    return Err(Error::UnorderedDates);
	}

	let start = history[0].0;
	let span = (history[history.len() - 1].0 - start).num_days() as f64;
	let scale = match history.iter().fold(0.0f64, |m,(_,y)| m.max(y.abs())) {
	    m if m > 0.0 => m,
	    _ => 1.0,
	};

	let t: Vec<f64> = history.iter()
	    .map(|(date,_)| (*date - start).num_days() as f64 / span).collect();
	let changepoints = changepoint_positions(&t, &config);

	let mut model = Self {
	    dates: history.iter().map(|(date,_)| *date).collect(),
	    start, span, scale, changepoints,
	    beta: DVector::zeros(0),
	    sigma_obs: 0.0,
	    config,
	};

	let n = history.len();
	let p = model.n_features();
	let mut x = DMatrix::<f64>::zeros(n, p);
	for (i,(date,_)) in history.iter().enumerate() {
	    for (j,v) in model.features(*date).into_iter().enumerate() {
		x[(i,j)] = v;
	    }
	}
	let y = DVector::from_iterator(n, history.iter().map(|(_,y)| y / scale));
	let prior = model.prior_scales();

	let xtx = x.transpose() * &x;
	let xty = x.transpose() * &y;

	// MAP estimate with gaussian priors; the noise variance sets the
	// strength of the penalty, so iterate a few times.
	let mut sigma2 = 0.25;
	for pass in 0..FIT_PASSES {
	    let mut a = xtx.clone();
	    for (i,s) in prior.iter().enumerate() {
		a[(i,i)] += sigma2 / (s * s);
	    }
	    model.beta = a.cholesky().ok_or(Error::Singular)?.solve(&xty);
	    let residuals = &y - &x * &model.beta;
	    sigma2 = (residuals.norm_squared() / n as f64).max(MIN_NOISE_VARIANCE);
	    debug!("Fit pass {}: noise sd {:.6}", pass, sigma2.sqrt());
	}
	model.sigma_obs = sigma2.sqrt();

	Ok(model)

    }

    fn n_features(&self) -> usize {
	2 + self.changepoints.len() + match self.config.weekly_seasonality {
	    true => 2 * WEEKLY_ORDER,
	    false => 0,
	}
    }

    fn prior_scales(&self) -> Vec<f64> {
	let mut prior = vec![self.config.trend_prior_scale; 2];
	prior.extend(self.changepoints.iter().map(|_| self.config.changepoint_prior_scale));
	prior.resize(self.n_features(), self.config.seasonality_prior_scale);
	prior
    }

    fn scaled_time(&self, date: NaiveDate) -> f64 {
	(date - self.start).num_days() as f64 / self.span
    }

    fn features(&self, date: NaiveDate) -> Vec<f64> {
	let t = self.scaled_time(date);
	let mut row = vec![1.0, t];
	row.extend(self.changepoints.iter().map(|s| (t - s).max(0.0)));
	if self.config.weekly_seasonality {
	    row.extend(weekly_terms(date));
	}
	row
    }

    fn trend_part(&self, date: NaiveDate) -> f64 {
	let n = 2 + self.changepoints.len();
	self.features(date)[..n].iter().zip(self.beta.iter())
	    .map(|(x,b)| x * b).sum::<f64>() * self.scale
    }

    fn weekly_part(&self, date: NaiveDate) -> f64 {
	match self.config.weekly_seasonality {
	    false => 0.0,
	    true => {
		let n = 2 + self.changepoints.len();
		weekly_terms(date).iter().zip(self.beta.iter().skip(n))
		    .map(|(x,b)| x * b).sum::<f64>() * self.scale
	    }
	}
    }

    /// Mean absolute changepoint delta, in scaled units.
    fn delta_scale(&self) -> f64 {
	let deltas = &self.beta.as_slice()[2..2 + self.changepoints.len()];
	match deltas.len() {
	    0 => 0.0,
	    n => deltas.iter().map(|d| d.abs()).sum::<f64>() / n as f64,
	}
    }

    /// Future trend changes arrive at the historical changepoint rate
    /// with laplace(delta_scale) slope jumps; their variance at horizon h
    /// integrates to 2 l^2 S h^3 / 3.
    fn trend_variance(&self, date: NaiveDate) -> f64 {
	let h = (self.scaled_time(date) - 1.0).max(0.0);
	let l = self.delta_scale();
	2.0 * l * l * self.changepoints.len() as f64 * h.powi(3) / 3.0
    }

    pub fn predict(&self, dates: &[NaiveDate]) -> Vec<ForecastRow> {
	let z = normal_quantile(0.5 + self.config.interval_width / 2.0);
	dates.iter().map(|date| {
	    let trend = self.trend_part(*date);
	    let weekly = self.weekly_part(*date);
	    let yhat = trend + weekly;
	    let sd = (self.sigma_obs.powi(2) + self.trend_variance(*date)).sqrt() * self.scale;
	    ForecastRow {
		date: *date,
		trend, weekly, yhat,
		yhat_lower: yhat - z * sd,
		yhat_upper: yhat + z * sd,
	    }
	}).collect()
    }

    /// History dates followed by `periods` steps past the last one.
    pub fn make_future_dates(&self, periods: usize, freq: Frequency) -> Vec<NaiveDate> {
	let last = self.dates[self.dates.len() - 1];
	self.dates.iter().copied().chain(
	    (1..=periods).map(|i| last + freq.step() * i as i32)
	).collect()
    }

    /// Weekly component over one week, Monday first.
    pub fn weekly_profile(&self) -> Vec<(String,f64)> {
	let monday = NaiveDate::from_ymd_opt(2017, 1, 2).unwrap_or(self.start);
	(0..7).map(|i| {
	    let date = monday + Duration::days(i);
	    (date.format("%A").to_string(), self.weekly_part(date))
	}).collect()
    }

    pub fn changepoints(&self) -> &[f64] {
	&self.changepoints
    }

}


/// Evenly spaced over the first `changepoint_range` share of the history,
/// never on the first point.
fn changepoint_positions(t: &[f64], config: &ModelConfig) -> Vec<f64> {
    let hist_size = (t.len() as f64 * config.changepoint_range).floor() as usize;
    let n = config.n_changepoints.min(hist_size.saturating_sub(1));
    (1..=n).map(
	|i| t[(i as f64 * (hist_size - 1) as f64 / n as f64).round() as usize]
    ).collect()
}


fn weekly_terms(date: NaiveDate) -> Vec<f64> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(date);
    let days = (date - epoch).num_days() as f64;
    (1..=WEEKLY_ORDER).flat_map(|n| {
	let x = 2.0 * PI * n as f64 * days / WEEKLY_PERIOD;
	vec![x.sin(), x.cos()]
    }).collect()
}


/// Inverse of the standard normal CDF (Acklam's rational approximation).
fn normal_quantile(p: f64) -> f64 {

    const A: [f64; 6] = [-3.969683028665376e+01, 2.209460984245205e+02, -2.759285104469687e+02,
			 1.383577518672690e+02, -3.066479806614716e+01, 2.506628277459239e+00];
    const B: [f64; 5] = [-5.447609879822406e+01, 1.615858368580409e+02, -1.556989798598866e+02,
			 6.680131188771972e+01, -1.328068155288572e+01];
    const C: [f64; 6] = [-7.784894002430293e-03, -3.223964580411365e-01, -2.400758277161838e+00,
			 -2.549732539343734e+00, 4.374664141464968e+00, 2.938163982698783e+00];
    const D: [f64; 4] = [7.784695709041462e-03, 3.224671290700398e-01, 2.445134137142996e+00,
			 3.754408661907416e+00];
    const P_LOW: f64 = 0.02425;

    let tail = |q: f64| (((((C[0]*q + C[1])*q + C[2])*q + C[3])*q + C[4])*q + C[5])
	/ ((((D[0]*q + D[1])*q + D[2])*q + D[3])*q + 1.0);

    if p <= 0.0 {
	f64::NEG_INFINITY
    } else if p >= 1.0 {
	f64::INFINITY
    } else if p < P_LOW {
	tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
	let q = p - 0.5;
	let r = q * q;
	(((((A[0]*r + A[1])*r + A[2])*r + A[3])*r + A[4])*r + A[5])*q
	    / (((((B[0]*r + B[1])*r + B[2])*r + B[3])*r + B[4])*r + 1.0)
    } else {
	-tail((-2.0 * (1.0 - p).ln()).sqrt())
    }

}


/// Coefficient of determination. A constant `actual` scores 1 for a
/// perfect prediction and 0 otherwise.
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
	return f64::NAN;
    }
    let mean = actual[..n].iter().sum::<f64>() / n as f64;
    let ss_res: f64 = actual.iter().zip(predicted).map(|(a,p)| (a - p).powi(2)).sum();
    let ss_tot: f64 = actual[..n].iter().map(|a| (a - mean).powi(2)).sum();
    match ss_tot == 0.0 {
	true => if ss_res == 0.0 {1.0} else {0.0},
	false => 1.0 - ss_res / ss_tot,
    }
}


/// Fit once, forecast once. Keeps the history around to score the
/// in-sample fit and to plot it.
#[derive(Debug,Clone,Default)]
pub struct Forecaster {
    config: ModelConfig,
    data: Series,
    model: Option<Model>,
    forecast: Option<Vec<ForecastRow>>,
}

impl Forecaster {

    pub fn new(config: ModelConfig) -> Self {
	Self { config, ..Default::default() }
    }

    pub fn fit(&mut self, data: Series) -> Result<()> {
	let model = Model::fit(&data, self.config.clone())?;
	debug!("Fitted {} points with {} changepoints", data.len(), model.changepoints().len());
	self.model = Some(model);
	self.data = data;
	self.forecast = None;
	Ok(())
    }

    /// Predictions for every historical date plus `periods` future steps.
    pub fn forecast(&mut self, periods: usize, freq: Frequency) -> Result<&[ForecastRow]> {
	let model = self.model.as_ref().ok_or(Error::NotFitted)?;
	let rows = model.predict(&model.make_future_dates(periods, freq));
	Ok(self.forecast.insert(rows).as_slice())
    }

    /// In-sample fit quality, not forecast skill.
    pub fn r2(&self) -> Result<f64> {
	let forecast = self.forecast.as_ref().ok_or(Error::NotForecast)?;
	let actual: Vec<f64> = self.data.iter().map(|(_,y)| *y).collect();
	let predicted: Vec<f64> = forecast.iter().take(actual.len()).map(|row| row.yhat).collect();
	Ok(r2_score(&actual, &predicted))
    }

    /// The last `periods` rows, i.e. the genuinely future ones.
    pub fn tail(&self, periods: usize) -> Result<&[ForecastRow]> {
	let forecast = self.forecast.as_ref().ok_or(Error::NotForecast)?;
	Ok(&forecast[forecast.len().saturating_sub(periods)..])
    }

    pub fn plot(&self, graph_path: &Path, xlabel: &str, ylabel: &str) -> Result<()> {
	let model = self.model.as_ref().ok_or(Error::NotFitted)?;
	let forecast = self.forecast.as_ref().ok_or(Error::NotForecast)?;
	graph::forecast_graph(graph_path, "forecast.html", "Fitted model and forecast",
			      xlabel, ylabel, &self.data, forecast)?;
	graph::components_graph(graph_path, "forecast-components.html",
				"Forecast components", forecast, &model.weekly_profile())
    }

}
