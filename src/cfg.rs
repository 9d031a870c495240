use core::error::Error;

use bytes::Bytes;

use crate::{
    cmd::{Cmd, HttpCmd, ModeCmd},
    loadgen, nethttp,
};

/// Application configuration assembled from command line arguments.
#[derive(Debug)]
pub struct Config {
    pub load: loadgen::Config,
    pub mode: ModeConfig,
}

#[derive(Debug)]
pub enum ModeConfig {
    Http(nethttp::Config),
}

impl TryFrom<Cmd> for Config {
    type Error = Box<dyn Error>;

    fn try_from(v: Cmd) -> Result<Self, Self::Error> {
        let load = loadgen::Config {
            number: v.number,
            concurrency: v.concurrency,
            rate_limit: v.rate_limit,
            duration: v.duration,
            slow_response: v.slow,
            live_ui: v.live_ui,
            ..loadgen::Config::default()
        };

        let mode = match v.mode {
            ModeCmd::Http(http) => ModeConfig::Http(http.try_into()?),
        };

        let m = Self { load, mode };

        Ok(m)
    }
}

impl TryFrom<HttpCmd> for nethttp::Config {
    type Error = Box<dyn Error>;

    fn try_from(v: HttpCmd) -> Result<Self, Self::Error> {
        let HttpCmd {
            url,
            method,
            headers,
            body,
            no_keepalive,
        } = v;

        let method = method.to_uppercase().parse::<http::Method>()?;

        let mut header_map = Vec::with_capacity(headers.len());
        for h in headers {
            let (name, value) = h
                .split_once(':')
                .ok_or_else(|| format!("invalid header: {h:?}"))?;

            header_map.push((name.trim().to_string(), value.trim().to_string()));
        }

        let m = Self {
            url,
            method,
            headers: header_map,
            body: body.map(Bytes::from).unwrap_or_default(),
            no_keepalive,
        };

        Ok(m)
    }
}
