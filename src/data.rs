use crate::config::{cache_dir, cache_ttl_secs, fetch_attempts};
use crate::error::AnalysisError;
use anyhow::Result;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// A single dated price observation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PricePoint {
    pub date: DateTime<Utc>,
    pub price: f64,
}

/// Ordered prices for one instrument. Timestamps are strictly increasing.
#[derive(Clone, Debug)]
pub struct PriceSeries {
    symbol: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, points: Vec<PricePoint>) -> crate::error::Result<Self> {
        let symbol = symbol.into();
        if let Some(i) = points.windows(2).position(|w| w[1].date <= w[0].date) {
            return Err(AnalysisError::invalid_input(format!(
                "{}: timestamps must be strictly increasing (index {} is {}, index {} is {})",
                symbol,
                i,
                points[i].date,
                i + 1,
                points[i + 1].date
            )));
        }
        Ok(Self { symbol, points })
    }

    /// Builds a series from bare prices, stamping them on consecutive days from 2000-01-01.
    pub fn from_prices(symbol: impl Into<String>, prices: &[f64]) -> crate::error::Result<Self> {
        let origin = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single().ok_or_else(|| {
            AnalysisError::invalid_input("cannot construct series origin timestamp")
        })?;
        let points = prices
            .iter()
            .enumerate()
            .map(|(i, &price)| PricePoint {
                date: origin + chrono::Duration::days(i as i64),
                price,
            })
            .collect();
        Self::new(symbol, points)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn prices(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.price).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_date(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<DateTime<Utc>> {
        self.points.last().map(|p| p.date)
    }
}

/// Inclusive start, exclusive end, as accepted by the chart endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|_| anyhow::anyhow!("Invalid date '{}', use YYYY-MM-DD", s.trim()))
        };
        let start = parse(start)?;
        let end = parse(end)?;
        if end <= start {
            return Err(anyhow::anyhow!(
                "End date {} must be after start date {}",
                end,
                start
            ));
        }
        Ok(Self { start, end })
    }

    fn unix_bounds(&self) -> (i64, i64) {
        let to_ts = |d: NaiveDate| d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp()).unwrap_or(0);
        (to_ts(self.start), to_ts(self.end))
    }
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooChart {
    #[serde(default)]
    result: Option<Vec<YahooResult>>,
    #[serde(default)]
    error: Option<YahooChartError>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooResult {
    #[serde(default)]
    timestamp: Option<Vec<i64>>,
    #[serde(default)]
    indicators: YahooIndicators,
}

#[derive(Deserialize, Serialize, Debug, Default)]
struct YahooIndicators {
    #[serde(default)]
    quote: Vec<YahooQuote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    adjclose: Option<Vec<YahooAdjClose>>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
struct YahooQuote {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    open: Option<Vec<Option<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    high: Option<Vec<Option<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    low: Option<Vec<Option<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    close: Option<Vec<Option<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    volume: Option<Vec<Option<f64>>>,
}

impl YahooQuote {
    fn available_fields(&self) -> Vec<String> {
        [
            ("open", self.open.is_some()),
            ("high", self.high.is_some()),
            ("low", self.low.is_some()),
            ("close", self.close.is_some()),
            ("volume", self.volume.is_some()),
        ]
        .iter()
        .filter(|(_, present)| *present)
        .map(|(name, _)| name.to_string())
        .collect()
    }
}

#[derive(Deserialize, Serialize, Debug, Default)]
struct YahooAdjClose {
    #[serde(default)]
    adjclose: Option<Vec<Option<f64>>>,
}

/// Normalizes a chart payload into a [`PriceSeries`].
///
/// Prefers the adjusted close and falls back to the raw close. Rows with a null
/// price are dropped; a repeated timestamp keeps the later row.
fn chart_to_price_series(
    symbol: &str,
    response: &YahooChartResponse,
) -> crate::error::Result<PriceSeries> {
    let result = match response.chart.result.as_ref().and_then(|r| r.first()) {
        Some(r) => r,
        None => {
            if let Some(err) = &response.chart.error {
                debug!(
                    "Chart error for {}: {:?} {:?}",
                    symbol, err.code, err.description
                );
            }
            return Err(AnalysisError::no_data(symbol));
        }
    };

    let timestamps = match result.timestamp.as_deref() {
        Some(ts) if !ts.is_empty() => ts,
        _ => return Err(AnalysisError::no_data(symbol)),
    };

    let adjclose = result
        .indicators
        .adjclose
        .as_ref()
        .and_then(|v| v.first())
        .and_then(|a| a.adjclose.as_ref());
    let close = result.indicators.quote.first().and_then(|q| q.close.as_ref());

    let prices = match (adjclose, close) {
        (Some(adj), _) => adj,
        (None, Some(close)) => {
            debug!("{}: no adjusted close, falling back to close", symbol);
            close
        }
        (None, None) => {
            let available = result
                .indicators
                .quote
                .first()
                .map(YahooQuote::available_fields)
                .unwrap_or_default();
            return Err(AnalysisError::ambiguous_field(symbol, available));
        }
    };

    if prices.len() != timestamps.len() {
        warn!(
            "{}: {} timestamps but {} prices; truncating to the shorter",
            symbol,
            timestamps.len(),
            prices.len()
        );
    }

    let mut points: Vec<PricePoint> = Vec::with_capacity(timestamps.len());
    let mut dropped = 0usize;
    for (&ts, price) in timestamps.iter().zip(prices.iter()) {
        let (Some(price), Some(date)) = (*price, Utc.timestamp_opt(ts, 0).single()) else {
            dropped += 1;
            continue;
        };
        if let Some(last) = points.last_mut() {
            if date == last.date {
                last.price = price;
                continue;
            }
            if date < last.date {
                dropped += 1;
                continue;
            }
        }
        points.push(PricePoint { date, price });
    }

    if dropped > 0 {
        debug!("{}: dropped {} rows without a usable price", symbol, dropped);
    }
    if points.is_empty() {
        return Err(AnalysisError::no_data(symbol));
    }

    PriceSeries::new(symbol.to_uppercase(), points)
}

fn read_cache(cache_file: &Path, ttl_secs: u64) -> Result<Option<YahooChartResponse>> {
    if !cache_file.exists() {
        return Ok(None);
    }
    let modified = std::fs::metadata(cache_file)?.modified()?;
    let age = std::time::SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default();
    if age.as_secs() >= ttl_secs {
        return Ok(None);
    }
    let file = std::fs::File::open(cache_file)?;
    let reader = std::io::BufReader::new(file);
    Ok(Some(serde_json::from_reader(reader)?))
}

fn write_cache(cache_file: &Path, response: &YahooChartResponse) -> Result<()> {
    let file = std::fs::File::create(cache_file)?;
    let writer = std::io::BufWriter::new(file);
    serde_json::to_writer(writer, response)?;
    Ok(())
}

async fn fetch_from_api(symbol: &str, range: &DateRange) -> Result<YahooChartResponse> {
    let (period1, period2) = range.unix_bounds();
    let url = format!(
        "https://query1.finance.yahoo.com/v8/finance/chart/{}?period1={}&period2={}&interval=1d&events=div%2Csplits",
        symbol, period1, period2
    );

    let client = reqwest::Client::new();
    let max_attempts = fetch_attempts();
    let mut attempts = 0;

    loop {
        attempts += 1;
        match client
            .get(&url)
            .header("User-Agent", "Mozilla/5.0")
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await
        {
            Ok(resp) => match resp.json::<YahooChartResponse>().await {
                Ok(parsed) => return Ok(parsed),
                Err(e) => {
                    if attempts >= max_attempts {
                        return Err(e.into());
                    }
                    warn!(
                        "Failed to parse JSON for {} (attempt {}/{}): {}",
                        symbol, attempts, max_attempts, e
                    );
                }
            },
            Err(e) => {
                if attempts >= max_attempts {
                    return Err(e.into());
                }
                warn!(
                    "Failed to fetch data for {} (attempt {}/{}): {}",
                    symbol, attempts, max_attempts, e
                );
            }
        }

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    }
}

/// Fetches daily prices for `symbol` over `range` from Yahoo Finance.
///
/// Responses are cached under [`cache_dir`] and reused while fresh. A cached or
/// fetched payload without data surfaces [`AnalysisError::NoData`] and is not
/// written to the cache.
pub async fn fetch_price_series(symbol: &str, range: &DateRange) -> Result<PriceSeries> {
    load_price_series(&cache_dir(), cache_ttl_secs(), symbol, range).await
}

async fn load_price_series(
    dir: &Path,
    ttl_secs: u64,
    symbol: &str,
    range: &DateRange,
) -> Result<PriceSeries> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(AnalysisError::invalid_input("empty symbol").into());
    }

    std::fs::create_dir_all(dir)?;
    let cache_file = dir.join(format!("{}_{}_{}.json", symbol, range.start, range.end));

    // A cache hit is never rewritten, so its age keeps counting toward the TTL.
    let (response, fetched) = match read_cache(&cache_file, ttl_secs) {
        Ok(Some(cached)) => {
            info!("Loading {} from cache...", symbol);
            (cached, false)
        }
        Ok(None) => {
            info!("Cache miss for {}, fetching...", symbol);
            (fetch_from_api(&symbol, range).await?, true)
        }
        Err(e) => {
            warn!("Ignoring unreadable cache for {}: {}", symbol, e);
            (fetch_from_api(&symbol, range).await?, true)
        }
    };

    let series = chart_to_price_series(&symbol, &response)?;
    if fetched {
        if let Err(e) = write_cache(&cache_file, &response) {
            warn!("Failed to cache {}: {}", symbol, e);
        }
    }

    info!(
        "{}: {} observations from {:?} to {:?}",
        series.symbol(),
        series.len(),
        series.first_date(),
        series.last_date()
    );
    Ok(series)
}

/// Fetches several symbols sequentially; the first failure aborts the batch.
pub async fn fetch_many(symbols: &[String], range: &DateRange) -> Result<Vec<PriceSeries>> {
    let mut out = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let series = fetch_price_series(symbol, range)
            .await
            .map_err(|e| e.context(format!("fetching {}", symbol)))?;
        out.push(series);
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) fn mock_series(symbol: &str, days: usize, daily_drift: f64, seed: u64) -> PriceSeries {
    use rand::{Rng, SeedableRng};

    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut price: f64 = 100.0;
    let mut prices = Vec::with_capacity(days);
    for _ in 0..days {
        prices.push(price);
        let change: f64 = rng.gen_range(-0.02..0.02);
        price *= 1.0 + daily_drift + change;
    }
    PriceSeries::from_prices(symbol, &prices).expect("mock prices are increasing in time")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> YahooChartResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_prefers_adjusted_close() {
        let response = parse(
            r#"{"chart":{"result":[{"timestamp":[1000,2000,3000],
                "indicators":{"quote":[{"close":[10.0,11.0,12.0]}],
                "adjclose":[{"adjclose":[9.0,10.0,11.0]}]}}],"error":null}}"#,
        );
        let series = chart_to_price_series("c", &response).unwrap();
        assert_eq!(series.symbol(), "C");
        assert_eq!(series.prices(), vec![9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_falls_back_to_close_and_drops_nulls() {
        let response = parse(
            r#"{"chart":{"result":[{"timestamp":[1000,2000,3000,4000],
                "indicators":{"quote":[{"open":[1.0,1.0,1.0,1.0],"close":[10.0,null,12.0,13.0]}]}}]}}"#,
        );
        let series = chart_to_price_series("ITC.NS", &response).unwrap();
        assert_eq!(series.prices(), vec![10.0, 12.0, 13.0]);
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn test_duplicate_timestamp_keeps_latest_row() {
        let response = parse(
            r#"{"chart":{"result":[{"timestamp":[1000,2000,2000],
                "indicators":{"quote":[{"close":[10.0,11.0,11.5]}]}}]}}"#,
        );
        let series = chart_to_price_series("X", &response).unwrap();
        assert_eq!(series.prices(), vec![10.0, 11.5]);
    }

    #[test]
    fn test_missing_price_field_is_ambiguous() {
        let response = parse(
            r#"{"chart":{"result":[{"timestamp":[1000,2000],
                "indicators":{"quote":[{"open":[1.0,2.0],"volume":[5.0,6.0]}]}}]}}"#,
        );
        let err = chart_to_price_series("C", &response).unwrap_err();
        assert_eq!(
            err,
            AnalysisError::ambiguous_field("C", vec!["open".to_string(), "volume".to_string()])
        );
    }

    #[test]
    fn test_unknown_symbol_is_no_data() {
        let response = parse(
            r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#,
        );
        let err = chart_to_price_series("NOPE", &response).unwrap_err();
        assert_eq!(err, AnalysisError::no_data("NOPE"));
    }

    #[test]
    fn test_empty_range_is_no_data() {
        let response = parse(r#"{"chart":{"result":[{"indicators":{"quote":[{}]}}]}}"#);
        assert!(matches!(
            chart_to_price_series("C", &response),
            Err(AnalysisError::NoData { .. })
        ));
    }

    #[test]
    fn test_series_rejects_unordered_timestamps() {
        let t = Utc.timestamp_opt(1_000, 0).unwrap();
        let points = vec![
            PricePoint { date: t, price: 1.0 },
            PricePoint { date: t, price: 2.0 },
        ];
        assert!(matches!(
            PriceSeries::new("X", points),
            Err(AnalysisError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_date_range_parse() {
        let range = DateRange::parse("2020-01-01", "2026-01-01").unwrap();
        let (p1, p2) = range.unix_bounds();
        assert_eq!(p1, 1_577_836_800);
        assert!(p2 > p1);
        assert!(DateRange::parse("2026-01-01", "2020-01-01").is_err());
        assert!(DateRange::parse("01/01/2020", "2026-01-01").is_err());
    }

    #[test]
    fn test_cache_roundtrip_and_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("C.json");
        assert!(read_cache(&path, 60).unwrap().is_none());

        let response = parse(
            r#"{"chart":{"result":[{"timestamp":[1000,2000],
                "indicators":{"quote":[{"close":[10.0,11.0]}]}}]}}"#,
        );
        write_cache(&path, &response).unwrap();

        let cached = read_cache(&path, 60).unwrap().unwrap();
        let series = chart_to_price_series("C", &cached).unwrap();
        assert_eq!(series.prices(), vec![10.0, 11.0]);

        assert!(read_cache(&path, 0).unwrap().is_none());
    }

    #[test]
    fn test_mock_series_shape() {
        let series = mock_series("TEST", 50, 0.0, 7);
        assert_eq!(series.len(), 50);
        assert!(series.prices().iter().all(|p| *p > 0.0));
    }

    #[tokio::test]
    async fn test_cache_hit_keeps_file_age() {
        let dir = tempfile::tempdir().unwrap();
        let range = DateRange::parse("2021-01-01", "2021-06-01").unwrap();
        let path = dir
            .path()
            .join(format!("C_{}_{}.json", range.start, range.end));
        let response = parse(
            r#"{"chart":{"result":[{"timestamp":[1000,2000,3000],
                "indicators":{"quote":[{"close":[10.0,11.0,12.5]}]}}]}}"#,
        );
        write_cache(&path, &response).unwrap();

        let backdated = std::time::SystemTime::now() - std::time::Duration::from_secs(86_000);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(backdated)
            .unwrap();
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();

        let series = load_price_series(dir.path(), 86_400, "c", &range).await.unwrap();
        assert_eq!(series.prices(), vec![10.0, 11.0, 12.5]);

        let after = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(before, after, "cache hit must not refresh the file's age");
        assert!(read_cache(&path, 86_400).unwrap().is_some());
        assert!(read_cache(&path, 85_000).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blank_symbol_rejected_before_fetch() {
        let range = DateRange::parse("2021-01-01", "2021-06-01").unwrap();
        let err = fetch_price_series("   ", &range).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::InvalidInput { .. })
        ));
    }
}
