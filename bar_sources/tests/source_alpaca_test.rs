use bar_sources::{
    models::{BarKind, HistoricalDataRequest, TimeFrame},
    sources::{
        BarSource, SourceInitError,
        alpaca::{AlpacaConfig, AlpacaSource},
    },
};
use chrono::{Duration, DurationRound, Utc};
use indexmap::IndexMap;
use serial_test::serial;

const KEY_ID_VAR: &str = "APCA_API_KEY_ID";
const SECRET_KEY_VAR: &str = "APCA_API_SECRET_KEY";

fn config() -> AlpacaConfig {
    AlpacaConfig {
        symbols: IndexMap::from([("BTCUSDT".to_string(), "BTC/USD".to_string())]),
        ..Default::default()
    }
}

struct EnvGuard(Vec<(&'static str, Option<String>)>);

impl EnvGuard {
    fn set(vars: &[(&'static str, Option<&str>)]) -> Self {
        let saved = vars
            .iter()
            .map(|(name, _)| (*name, std::env::var(name).ok()))
            .collect();
        for (name, value) in vars {
            // SAFETY: tests touching the environment are #[serial].
            unsafe {
                match value {
                    Some(v) => std::env::set_var(name, v),
                    None => std::env::remove_var(name),
                }
            }
        }
        EnvGuard(saved)
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (name, value) in &self.0 {
            unsafe {
                match value {
                    Some(v) => std::env::set_var(name, v),
                    None => std::env::remove_var(name),
                }
            }
        }
    }
}

#[test]
#[serial]
fn builds_without_keys() {
    let _env = EnvGuard::set(&[(KEY_ID_VAR, None), (SECRET_KEY_VAR, None)]);
    assert!(AlpacaSource::new("alpaca", config()).is_ok());
}

#[test]
#[serial]
fn half_configured_keys_are_rejected() {
    let _env = EnvGuard::set(&[(KEY_ID_VAR, Some("key")), (SECRET_KEY_VAR, None)]);
    let err = AlpacaSource::new("alpaca", config()).err().unwrap();
    assert!(matches!(err, SourceInitError::MissingEnvVar { .. }));
    assert!(err.to_string().contains(SECRET_KEY_VAR));
}

#[test]
#[serial]
fn zero_rate_limit_is_rejected() {
    let _env = EnvGuard::set(&[(KEY_ID_VAR, None), (SECRET_KEY_VAR, None)]);
    let config = AlpacaConfig {
        requests_per_minute: 0,
        ..config()
    };
    assert!(matches!(
        AlpacaSource::new("alpaca", config),
        Err(SourceInitError::InvalidConfig { .. })
    ));
}

#[tokio::test]
#[serial]
async fn unmapped_symbols_and_other_kinds_miss_without_a_request() {
    let _env = EnvGuard::set(&[(KEY_ID_VAR, None), (SECRET_KEY_VAR, None)]);
    // Unroutable base URL: any request would fail hard.
    let source = AlpacaSource::new(
        "alpaca",
        AlpacaConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..config()
        },
    )
    .unwrap();
    let start = Utc::now().duration_trunc(Duration::days(1)).unwrap() - Duration::days(3);
    let request =
        HistoricalDataRequest::new("binance", "spot", "ETHUSDT", TimeFrame::M1, start, start + Duration::days(1));

    assert!(source.try_get(&request).await.unwrap().is_none());

    let mark = HistoricalDataRequest {
        symbol: "BTCUSDT".into(),
        ..request
    }
    .with_bar_kind(BarKind::MarkPrice);
    assert!(source.try_get(&mark).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore]
async fn live_crypto_bars() {
    let source = AlpacaSource::new("alpaca", config()).expect("Failed to create AlpacaSource");
    let start = Utc::now().duration_trunc(Duration::days(1)).unwrap() - Duration::days(2);
    let request =
        HistoricalDataRequest::new("binance", "spot", "BTCUSDT", TimeFrame::H1, start, start + Duration::days(1));

    let bars = source
        .try_get(&request)
        .await
        .expect("fetch returned an error")
        .expect("expected bars for BTC/USD");

    assert!(bars.len() <= 24);
    assert!(bars.windows(2).all(|w| w[0].open_time < w[1].open_time));
}
