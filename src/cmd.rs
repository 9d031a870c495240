use core::time::Duration;

use clap::{ArgAction, Parser};

/// Pocket load tester pushes to the limit.
#[derive(Debug, Clone, Parser)]
#[command(version, about = "Pocket load tester pushes to the limit")]
pub struct Cmd {
    #[clap(subcommand)]
    pub mode: ModeCmd,
    /// Number of requests to run, 0 is infinite.
    #[clap(long, global = true, default_value_t = 0)]
    pub number: u64,
    /// Number of requests to run concurrently.
    #[clap(long, global = true, default_value_t = 50)]
    pub concurrency: u64,
    /// Rate limit, in requests per second, 0 disables limit (default).
    #[clap(long, global = true, default_value_t = 0)]
    pub rate_limit: u64,
    /// Max duration of load testing, 0 is infinite.
    #[clap(long, global = true, value_parser = parse_duration, default_value = "0")]
    pub duration: Duration,
    /// Min duration of slow response.
    #[clap(long, global = true, value_parser = parse_duration, default_value = "1s")]
    pub slow: Duration,
    /// Show live ui with statistics.
    #[clap(long, global = true)]
    pub live_ui: bool,
    /// Be verbose in terms of logging.
    #[clap(short, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Parser)]
pub enum ModeCmd {
    /// HTTP load.
    Http(HttpCmd),
}

#[derive(Debug, Clone, Parser)]
pub struct HttpCmd {
    /// Target URL.
    #[clap(required = true)]
    pub url: String,
    /// Request method.
    #[clap(short = 'X', long, default_value = "GET")]
    pub method: String,
    /// Request header in "Name: value" form, repeatable.
    #[clap(short = 'H', long = "header")]
    pub headers: Vec<String>,
    /// Request body.
    #[clap(long)]
    pub body: Option<String>,
    /// Disable keep-alive connection reuse.
    #[clap(long)]
    pub no_keepalive: bool,
}

/// Parses durations of the "300ms", "5s", "2m", "1h" forms.
///
/// A bare number is taken as seconds.
pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (value, unit) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };

    let value: f64 = value
        .parse()
        .map_err(|_| format!("invalid duration: {s:?}"))?;
    let secs = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return Err(format!("unknown duration unit: {unit:?}")),
    };
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("invalid duration: {s:?}"));
    }

    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(Duration::ZERO, parse_duration("0").unwrap());
        assert_eq!(Duration::from_millis(300), parse_duration("300ms").unwrap());
        assert_eq!(Duration::from_secs(5), parse_duration("5s").unwrap());
        assert_eq!(Duration::from_secs(90), parse_duration("1.5m").unwrap());
        assert_eq!(Duration::from_secs(7200), parse_duration("2h").unwrap());
        assert!(parse_duration("5parsecs").is_err());
        assert!(parse_duration("fast").is_err());
    }

    #[test]
    fn load_flag_defaults() {
        let cmd = Cmd::try_parse_from(["plt", "http", "http://localhost/"]).unwrap();

        assert_eq!(0, cmd.number);
        assert_eq!(50, cmd.concurrency);
        assert_eq!(0, cmd.rate_limit);
        assert_eq!(Duration::ZERO, cmd.duration);
        assert_eq!(Duration::from_secs(1), cmd.slow);
        assert!(!cmd.live_ui);
    }

    #[test]
    fn http_flags() {
        let cmd = Cmd::try_parse_from([
            "plt",
            "http",
            "http://localhost:8080/hello",
            "-X",
            "POST",
            "-H",
            "X-Foo: bar",
            "--body",
            "payload",
            "--number",
            "100",
            "--rate-limit",
            "20",
            "--duration",
            "1m",
        ])
        .unwrap();

        assert_eq!(100, cmd.number);
        assert_eq!(20, cmd.rate_limit);
        assert_eq!(Duration::from_secs(60), cmd.duration);

        let ModeCmd::Http(http) = cmd.mode;
        assert_eq!("POST", http.method);
        assert_eq!(vec!["X-Foo: bar".to_string()], http.headers);
        assert_eq!(Some("payload".to_string()), http.body);
    }
}
