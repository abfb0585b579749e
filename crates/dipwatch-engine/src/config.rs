use anyhow::{Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use dipwatch_core::SectorSpec;
use std::env;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Scheduling
    pub alert_cycle_minutes: u64,          // 2
    pub sector_cycle_minutes: u64,         // 15
    pub alert_cycle_market_hours_only: bool,

    // Sector state machine
    pub sector_cooldown_seconds: i64,      // 1800
    pub bundle_cooldown_minutes: i64,      // 30

    // Noise control
    pub daily_user_cap: i64,               // 5
    pub daily_symbol_cap: i64,             // 2
    pub quiet_start: NaiveTime,            // 22:00
    pub quiet_end: NaiveTime,              // 08:00

    // Market data
    pub exchange_timezone: Tz,
    pub bar_history_days: u32,             // 365; >= 200 enables SMA200
    pub bar_cache_ttl_seconds: u64,        // 900
    pub bar_fetch_timeout_seconds: u64,    // 10
    pub bar_fetch_retries: u32,            // 2

    // Scoring / ranking
    pub candidate_limit: usize,            // 12
    pub min_price: f64,                    // 50
    pub min_adtv: f64,                     // 1e6

    // Stores
    pub database_url: String,
    pub redis_url: String,

    // Notifications
    pub fcm_endpoint: Option<String>,

    // Universe
    pub sectors: Vec<SectorSpec>,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let quiet_start = parse_time(
            &env::var("QUIET_START").unwrap_or_else(|_| "22:00".to_string()),
        )
        .context("QUIET_START")?;
        let quiet_end = parse_time(
            &env::var("QUIET_END").unwrap_or_else(|_| "08:00".to_string()),
        )
        .context("QUIET_END")?;

        let exchange_timezone: Tz = env::var("EXCHANGE_TIMEZONE")
            .unwrap_or_else(|_| "Asia/Kolkata".to_string())
            .parse()
            .map_err(|e| anyhow::anyhow!("EXCHANGE_TIMEZONE: {e}"))?;

        let sectors = match env::var("SECTORS") {
            Ok(raw) => parse_sectors(&raw).context("SECTORS")?,
            Err(_) => default_sectors(),
        };

        Ok(Self {
            alert_cycle_minutes: env::var("ALERT_CYCLE_MINUTES")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,
            sector_cycle_minutes: env::var("SECTOR_CYCLE_MINUTES")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,
            alert_cycle_market_hours_only: env::var("ALERT_CYCLE_MARKET_HOURS_ONLY")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,

            sector_cooldown_seconds: env::var("SECTOR_COOLDOWN_SECONDS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()?,
            bundle_cooldown_minutes: env::var("BUNDLE_COOLDOWN_MINUTES")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,

            daily_user_cap: env::var("DAILY_USER_CAP")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            daily_symbol_cap: env::var("DAILY_SYMBOL_CAP")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,
            quiet_start,
            quiet_end,

            exchange_timezone,
            bar_history_days: env::var("BAR_HISTORY_DAYS")
                .unwrap_or_else(|_| "365".to_string())
                .parse()?,
            bar_cache_ttl_seconds: env::var("BAR_CACHE_TTL_SECONDS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()?,
            bar_fetch_timeout_seconds: env::var("BAR_FETCH_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            bar_fetch_retries: env::var("BAR_FETCH_RETRIES")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,

            candidate_limit: env::var("CANDIDATE_LIMIT")
                .unwrap_or_else(|_| "12".to_string())
                .parse()?,
            min_price: env::var("FILTER_MIN_PRICE")
                .unwrap_or_else(|_| "50.0".to_string())
                .parse()?,
            min_adtv: env::var("FILTER_MIN_ADTV")
                .unwrap_or_else(|_| "1000000".to_string())
                .parse()?,

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:dipwatch.db".to_string()),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),

            fcm_endpoint: env::var("FCM_ENDPOINT").ok().filter(|s| !s.is_empty()),

            sectors,
        })
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .with_context(|| format!("expected HH:MM, got {raw:?}"))
}

/// Sector universe syntax: `id:Name:SYM1|SYM2|SYM3;id2:Name2:...`
fn parse_sectors(raw: &str) -> Result<Vec<SectorSpec>> {
    let mut sectors = Vec::new();

    for chunk in raw.split(';').filter(|c| !c.trim().is_empty()) {
        let mut parts = chunk.splitn(3, ':');
        let (id, name, members) = match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(name), Some(members)) => (id, name, members),
            _ => anyhow::bail!("expected id:Name:SYM1|SYM2, got {chunk:?}"),
        };

        let members: Vec<String> = members
            .split('|')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if members.is_empty() {
            anyhow::bail!("sector {id:?} has no members");
        }

        sectors.push(SectorSpec {
            id: id.trim().to_string(),
            name: name.trim().to_string(),
            members,
            weights: None,
        });
    }

    Ok(sectors)
}

/// Default NSE sector universe.
fn default_sectors() -> Vec<SectorSpec> {
    let sector = |id: &str, name: &str, members: &[&str]| SectorSpec {
        id: id.to_string(),
        name: name.to_string(),
        members: members.iter().map(|s| s.to_string()).collect(),
        weights: None,
    };

    vec![
        sector(
            "it",
            "Information Technology",
            &["TCS.NS", "INFY.NS", "WIPRO.NS", "HCLTECH.NS", "TECHM.NS"],
        ),
        sector(
            "banking",
            "Banking",
            &["HDFCBANK.NS", "ICICIBANK.NS", "SBIN.NS", "KOTAKBANK.NS", "AXISBANK.NS"],
        ),
        sector(
            "auto",
            "Automobile",
            &["MARUTI.NS", "TATAMOTORS.NS", "M&M.NS", "BAJAJ-AUTO.NS", "EICHERMOT.NS"],
        ),
        sector(
            "pharma",
            "Pharmaceuticals",
            &["SUNPHARMA.NS", "DRREDDY.NS", "CIPLA.NS", "DIVISLAB.NS", "LUPIN.NS"],
        ),
        sector(
            "energy",
            "Energy",
            &["RELIANCE.NS", "ONGC.NS", "NTPC.NS", "POWERGRID.NS", "BPCL.NS"],
        ),
        sector(
            "fmcg",
            "Consumer Goods",
            &["HINDUNILVR.NS", "ITC.NS", "NESTLEIND.NS", "BRITANNIA.NS", "DABUR.NS"],
        ),
    ]
}
