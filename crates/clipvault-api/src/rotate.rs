//! Outbound bind-address rotation.
//!
//! The upstream enforces a per-IP daily quota. Hosts with several
//! routable addresses can spread requests across them: the rotator
//! hands out addresses round-robin and parks any address that hit the
//! quota until its cool-down lapses.

use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Default per-address exhaustion cool-down.
pub const DEFAULT_EXHAUSTION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

struct AddrState {
    ip: IpAddr,
    exhausted_at: Option<Instant>,
}

struct Inner {
    addrs: Vec<AddrState>,
    cursor: usize,
    last_used: Option<IpAddr>,
}

/// Round-robins a pool of local bind addresses.
pub struct AddrRotator {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl AddrRotator {
    /// Build a rotator from a comma-separated list of bind specifiers.
    ///
    /// Each specifier is either a literal IP or a local interface name,
    /// in which case the first non-loopback IPv4 address of that
    /// interface is used. Fails if no specifier resolves.
    pub fn new(bind_addresses: &str, ttl: Duration) -> Result<Self> {
        let mut addrs = Vec::new();
        for part in bind_addresses.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let ip = resolve_bind_addr(part)?;
            addrs.push(AddrState {
                ip,
                exhausted_at: None,
            });
        }
        if addrs.is_empty() {
            return Err(Error::Bind(bind_addresses.to_string()));
        }
        Ok(Self {
            inner: Mutex::new(Inner {
                addrs,
                cursor: 0,
                last_used: None,
            }),
            ttl,
        })
    }

    /// The next non-exhausted address, advancing the cursor.
    ///
    /// Expired exhaustions are cleared first. Fails with
    /// [`Error::AddressesExhausted`] when every address is parked;
    /// callers must treat that as fatal for the request.
    pub fn next_available(&self) -> Result<IpAddr> {
        let mut inner = self.inner.lock().unwrap();

        for state in inner.addrs.iter_mut() {
            if let Some(at) = state.exhausted_at {
                if at.elapsed() > self.ttl {
                    state.exhausted_at = None;
                }
            }
        }

        let n = inner.addrs.len();
        for i in 0..n {
            let idx = (inner.cursor + i) % n;
            if inner.addrs[idx].exhausted_at.is_none() {
                let ip = inner.addrs[idx].ip;
                inner.cursor = (idx + 1) % n;
                inner.last_used = Some(ip);
                return Ok(ip);
            }
        }
        Err(Error::AddressesExhausted)
    }

    /// Park the most recently returned address for one cool-down.
    pub fn mark_current_exhausted(&self) {
        let mut inner = self.inner.lock().unwrap();
        let Some(last) = inner.last_used else { return };
        for state in inner.addrs.iter_mut() {
            if state.ip == last {
                state.exhausted_at = Some(Instant::now());
                break;
            }
        }
    }

    pub fn addresses(&self) -> Vec<IpAddr> {
        self.inner.lock().unwrap().addrs.iter().map(|s| s.ip).collect()
    }
}

fn resolve_bind_addr(spec: &str) -> Result<IpAddr> {
    if let Ok(ip) = spec.parse::<IpAddr>() {
        return Ok(ip);
    }
    interface_ipv4(spec)
}

/// First non-loopback IPv4 address of the named interface.
#[cfg(unix)]
fn interface_ipv4(name: &str) -> Result<IpAddr> {
    let ifaddrs = nix::ifaddrs::getifaddrs().map_err(|e| Error::Bind(format!("{name}: {e}")))?;
    for ifaddr in ifaddrs {
        if ifaddr.interface_name != name {
            continue;
        }
        let Some(addr) = ifaddr.address else { continue };
        let Some(sin) = addr.as_sockaddr_in() else { continue };
        let ip = sin.ip();
        if !ip.is_loopback() {
            return Ok(IpAddr::V4(ip));
        }
    }
    Err(Error::Bind(name.to_string()))
}

#[cfg(not(unix))]
fn interface_ipv4(name: &str) -> Result<IpAddr> {
    Err(Error::Bind(format!(
        "{name}: interface lookup is not supported on this platform, use a literal IP"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_spec() {
        assert!(AddrRotator::new("", DEFAULT_EXHAUSTION_TTL).is_err());
        assert!(AddrRotator::new(" , ,", DEFAULT_EXHAUSTION_TTL).is_err());
    }

    #[test]
    fn rejects_unresolvable_spec() {
        assert!(AddrRotator::new("10.0.0.1,not-an-interface-zz9", DEFAULT_EXHAUSTION_TTL).is_err());
    }

    #[test]
    fn round_robins_literal_addresses() {
        let rotator =
            AddrRotator::new("10.0.0.1, 10.0.0.2, 10.0.0.3", DEFAULT_EXHAUSTION_TTL).unwrap();
        let a = rotator.next_available().unwrap();
        let b = rotator.next_available().unwrap();
        let c = rotator.next_available().unwrap();
        let d = rotator.next_available().unwrap();
        assert_eq!(a.to_string(), "10.0.0.1");
        assert_eq!(b.to_string(), "10.0.0.2");
        assert_eq!(c.to_string(), "10.0.0.3");
        assert_eq!(d, a);
    }

    #[test]
    fn exhausted_addresses_are_skipped() {
        let rotator = AddrRotator::new("10.0.0.1,10.0.0.2", DEFAULT_EXHAUSTION_TTL).unwrap();
        let first = rotator.next_available().unwrap();
        rotator.mark_current_exhausted();
        let second = rotator.next_available().unwrap();
        let third = rotator.next_available().unwrap();
        assert_ne!(first, second);
        assert_eq!(second, third);
    }

    #[test]
    fn all_exhausted_is_an_error() {
        let rotator = AddrRotator::new("10.0.0.1", DEFAULT_EXHAUSTION_TTL).unwrap();
        rotator.next_available().unwrap();
        rotator.mark_current_exhausted();
        assert!(matches!(
            rotator.next_available(),
            Err(Error::AddressesExhausted)
        ));
    }

    #[test]
    fn expired_exhaustion_is_cleared() {
        let rotator = AddrRotator::new("10.0.0.1", Duration::ZERO).unwrap();
        rotator.next_available().unwrap();
        rotator.mark_current_exhausted();
        std::thread::sleep(Duration::from_millis(5));
        assert!(rotator.next_available().is_ok());
    }
}
