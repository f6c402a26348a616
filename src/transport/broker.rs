//! Broker connection settings and their translation into rumqttc options.
//!
//! Addresses may carry a scheme (`mqtt://`, `tcp://`, `mqtts://`, `ssl://`)
//! and may omit the port, in which case 1883 or 8883 is used depending on
//! whether TLS is on. TLS trusts the platform roots unless a CA file is given.

use anyhow::{anyhow, bail, Context, Result};
use rumqttc::v5::MqttOptions;
use rumqttc::Transport;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

const PLAIN_PORT: u16 = 1883;
const TLS_PORT: u16 = 8883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Camera frames can be far larger than rumqttc's default packet limit.
const MAX_PACKET_SIZE: u32 = 16 * 1024 * 1024;

/// Scheme prefix and whether it implies TLS.
const SCHEMES: [(&str, bool); 4] = [
    ("mqtt", false),
    ("tcp", false),
    ("mqtts", true),
    ("ssl", true),
];

/// Where the broker listens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerAddress {
    /// Parse `[scheme://]host[:port]`. `force_tls` turns TLS on for
    /// scheme-less or plain-scheme addresses.
    pub fn parse(addr: &str, force_tls: bool) -> Result<Self> {
        let addr = addr.trim();
        let (scheme_tls, rest) = match addr.split_once("://") {
            Some((scheme, rest)) => {
                let tls = SCHEMES
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(scheme))
                    .map(|(_, tls)| *tls)
                    .ok_or_else(|| anyhow!("unsupported broker scheme '{}'", scheme))?;
                (tls, rest)
            }
            None => (false, addr),
        };
        let tls = force_tls || scheme_tls;
        let default_port = if tls { TLS_PORT } else { PLAIN_PORT };
        let (host, port) = split_host_port(rest, default_port)
            .with_context(|| format!("invalid broker address '{}'", addr))?;
        Ok(Self { host, port, tls })
    }
}

fn split_host_port(rest: &str, default_port: u16) -> Result<(String, u16)> {
    if let Ok(socket) = rest.parse::<SocketAddr>() {
        return Ok((socket.ip().to_string(), socket.port()));
    }
    let bare = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']'));
    if let Ok(ip) = bare.unwrap_or(rest).parse::<IpAddr>() {
        return Ok((ip.to_string(), default_port));
    }
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().context("bad port")?),
        None => (rest, default_port),
    };
    if host.is_empty() || host.contains(['/', ':', '[', ']']) {
        bail!("bad host '{}'", host);
    }
    Ok((host.to_string(), port))
}

/// PEM files for TLS. Client certificate and key go together.
#[derive(Clone, Debug, Default)]
pub struct TlsFiles {
    pub ca: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl TlsFiles {
    fn is_empty(&self) -> bool {
        self.ca.is_none() && self.client_cert.is_none() && self.client_key.is_none()
    }

    /// Transport for `address`, reading the PEM files it needs.
    pub fn transport(&self, address: &BrokerAddress) -> Result<Transport> {
        if !address.tls {
            if !self.is_empty() {
                bail!("TLS files given but the broker address is plain");
            }
            return Ok(Transport::tcp());
        }

        let client_auth = match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => Some((
                read_pem(cert, "client certificate")?,
                read_pem(key, "client key")?,
            )),
            (None, None) => None,
            _ => bail!("TLS client certificate and key must be given together"),
        };
        match (&self.ca, client_auth) {
            (Some(ca), client_auth) => Ok(Transport::tls(read_pem(ca, "CA")?, client_auth, None)),
            (None, None) => Ok(Transport::tls_with_default_config()),
            (None, Some(_)) => bail!("a TLS CA file is required with client certificates"),
        }
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path)
        .with_context(|| format!("failed to read TLS {} '{}'", what, path.display()))
}

/// Everything needed to open the MQTT session.
#[derive(Clone, Debug)]
pub struct BrokerSettings {
    pub address: BrokerAddress,
    pub tls: TlsFiles,
    pub client_id: String,
    /// Username and password (possibly empty).
    pub credentials: Option<(String, String)>,
}

impl BrokerSettings {
    pub fn mqtt_options(&self) -> Result<MqttOptions> {
        let mut options =
            MqttOptions::new(&self.client_id, &self.address.host, self.address.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_start(true);
        options.set_max_packet_size(Some(MAX_PACKET_SIZE));
        if let Some((user, password)) = &self.credentials {
            options.set_credentials(user, password);
        }
        options.set_transport(self.tls.transport(&self.address)?);
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn settings(addr: &str, tls: TlsFiles) -> BrokerSettings {
        BrokerSettings {
            address: BrokerAddress::parse(addr, false).unwrap(),
            tls,
            client_id: "blink_processor".to_string(),
            credentials: None,
        }
    }

    #[test]
    fn port_defaults_follow_tls() {
        let plain = BrokerAddress::parse("broker.local", false).unwrap();
        assert_eq!((plain.host.as_str(), plain.port, plain.tls), ("broker.local", 1883, false));

        let secure = BrokerAddress::parse("mqtts://broker.local", false).unwrap();
        assert_eq!((secure.port, secure.tls), (8883, true));

        let forced = BrokerAddress::parse("tcp://broker.local:2000", true).unwrap();
        assert_eq!((forced.port, forced.tls), (2000, true));
    }

    #[test]
    fn ipv6_with_and_without_port() {
        let with_port = BrokerAddress::parse("[fe80::1]:1884", false).unwrap();
        assert_eq!((with_port.host.as_str(), with_port.port), ("fe80::1", 1884));

        let bracketed = BrokerAddress::parse("[::1]", false).unwrap();
        assert_eq!((bracketed.host.as_str(), bracketed.port), ("::1", 1883));

        let bare = BrokerAddress::parse("::1", true).unwrap();
        assert_eq!((bare.host.as_str(), bare.port), ("::1", 8883));
    }

    #[test]
    fn rejects_malformed_addresses() {
        for addr in ["ws://broker:80", "broker:http", ":1883", "a/b:1883", ""] {
            assert!(BrokerAddress::parse(addr, false).is_err(), "{}", addr);
        }
    }

    #[test]
    fn options_carry_address_and_limits() {
        let mut broker = settings("mqtt://10.0.0.5:1999", TlsFiles::default());
        broker.credentials = Some(("uav".to_string(), String::new()));
        let options = broker.mqtt_options().unwrap();
        assert_eq!(options.broker_address(), ("10.0.0.5".to_string(), 1999));
        assert_eq!(options.keep_alive(), KEEP_ALIVE);
        assert!(matches!(options.transport(), Transport::Tcp));
    }

    #[test]
    fn plain_address_refuses_tls_files() {
        let tls = TlsFiles {
            ca: Some(PathBuf::from("/etc/ssl/ca.pem")),
            ..TlsFiles::default()
        };
        let err = settings("localhost:1883", tls).mqtt_options().unwrap_err();
        assert!(err.to_string().contains("address is plain"));
    }

    #[test]
    fn client_auth_needs_pair_and_ca() {
        let dir = tempfile::tempdir().unwrap();
        let pem = dir.path().join("client.pem");
        std::fs::File::create(&pem)
            .unwrap()
            .write_all(b"-----BEGIN CERTIFICATE-----\n")
            .unwrap();

        let half = TlsFiles {
            client_cert: Some(pem.clone()),
            ..TlsFiles::default()
        };
        let err = settings("mqtts://localhost", half).mqtt_options().unwrap_err();
        assert!(err.to_string().contains("together"));

        let no_ca = TlsFiles {
            client_cert: Some(pem.clone()),
            client_key: Some(pem.clone()),
            ..TlsFiles::default()
        };
        let err = settings("mqtts://localhost", no_ca).mqtt_options().unwrap_err();
        assert!(err.to_string().contains("CA file is required"));

        let full = TlsFiles {
            ca: Some(pem.clone()),
            client_cert: Some(pem.clone()),
            client_key: Some(pem),
        };
        let options = settings("mqtts://localhost", full).mqtt_options().unwrap();
        assert!(matches!(options.transport(), Transport::Tls(_)));
    }

    #[test]
    fn missing_ca_file_names_the_path() {
        let tls = TlsFiles {
            ca: Some(PathBuf::from("/nonexistent/blink-ca.pem")),
            ..TlsFiles::default()
        };
        let err = settings("ssl://localhost", tls).mqtt_options().unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/blink-ca.pem"));
    }
}
