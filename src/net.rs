// SPDX-License-Identifier: Apache-2.0

//! Network/TAP registration (spec §4.G.9): opens `/dev/net/tun`, attaches
//! it as a TAP device, optionally negotiates a virtio-net header and
//! checksum/TSO offload, and validates the IPv4 address/gateway/mask the
//! in-enclave network stack will be configured with.

use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;

use anyhow::{bail, Context, Result};
use iocuddle::*;

use crate::config::record::NetConfig;

const IFNAMSIZ: usize = 16;

const TUN: Group = Group::new(b'T');
/// `TUNSETIFF`, attaches the fd to a named TAP/TUN interface.
const TUNSETIFF: Ioctl<Write, &IfReq> = unsafe { TUN.write(202) };

const IFF_TAP: i16 = 0x0002;
const IFF_NO_PI: i16 = 0x1000;
const IFF_VNET_HDR: i16 = 0x4000;

const TUNSETVNETHDRSZ: libc::c_ulong = 0x4004_54d8;
const TUNSETOFFLOAD: libc::c_ulong = 0x4004_54d0;

const TUN_F_CSUM: u32 = 0x01;
const TUN_F_TSO4: u32 = 0x02;
const TUN_F_TSO6: u32 = 0x04;

/// `virtio_net_hdr_v1`'s size, used for `TUNSETVNETHDRSZ` when offload is
/// requested (spec §4.G.9).
const VIRTIO_NET_HDR_V1_SIZE: i32 = 12;

/// Mirrors `struct ifreq` from `<linux/if.h>`: a 16-byte name followed by a
/// 16-byte union, of which only `ifr_flags` is used here.
#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_flags: i16,
    _pad: [u8; 14],
}

impl IfReq {
    fn named(name: &str, flags: i16) -> Result<Self> {
        if name.len() >= IFNAMSIZ {
            bail!("tap device name {:?} too long", name);
        }
        let mut ifr_name = [0 as libc::c_char; IFNAMSIZ];
        for (dst, src) in ifr_name.iter_mut().zip(name.bytes()) {
            *dst = src as libc::c_char;
        }
        Ok(Self {
            ifr_name,
            ifr_flags: flags,
            _pad: [0; 14],
        })
    }
}

pub const DEFAULT_IPV4_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 1);
pub const DEFAULT_IPV4_ADDR_STR: &str = "10.0.1.1";
pub const DEFAULT_IPV4_GW: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 254);
pub const DEFAULT_IPV4_GW_STR: &str = "10.0.1.254";
pub const DEFAULT_IPV4_MASK: u8 = 24;
pub const DEFAULT_HOSTNAME: &str = "lkl";

pub struct NetSettings<'a> {
    pub tap: Option<&'a str>,
    pub tap_offload: bool,
    pub ip4: Option<&'a str>,
    pub gw4: Option<&'a str>,
    pub mask4: Option<&'a str>,
    pub hostname: Option<&'a str>,
}

/// Registers the network device described by `settings`. Returns a
/// `NetConfig` with `tap_fd: None` (and the default address/hostname) if no
/// tap device was specified, matching the original's "no tap specified"
/// early return.
pub fn register_net(settings: NetSettings) -> Result<NetConfig> {
    let hostname = settings.hostname.unwrap_or(DEFAULT_HOSTNAME).to_string();

    let tapstr = match settings.tap {
        Some(t) if !t.is_empty() => t,
        _ => {
            log::info!("[ Launcher ] no tap device specified, networking will not be available");
            return Ok(NetConfig {
                tap_fd: None,
                hostname,
                ..Default::default()
            });
        }
    };

    let mut flags = IFF_TAP | IFF_NO_PI;
    if settings.tap_offload {
        flags |= IFF_VNET_HDR;
    }

    let mut file = unsafe {
        use std::fs::OpenOptions;
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open("/dev/net/tun")
            .context("TUN network device unavailable, open(\"/dev/net/tun\") failed")?
    };

    let ifr = IfReq::named(tapstr, flags)?;
    TUNSETIFF
        .ioctl(&mut file, &ifr)
        .with_context(|| format!("tap device {} unavailable, TUNSETIFF failed", tapstr))?;

    let fd: RawFd = std::os::unix::io::AsRawFd::as_raw_fd(&file);

    if settings.tap_offload {
        if unsafe { libc::ioctl(fd, TUNSETVNETHDRSZ, &VIRTIO_NET_HDR_V1_SIZE) } != 0 {
            return Err(std::io::Error::last_os_error()).context("TUNSETVNETHDRSZ: /dev/net/tun failed");
        }
        let offload = TUN_F_TSO4 | TUN_F_TSO6 | TUN_F_CSUM;
        if unsafe { libc::ioctl(fd, TUNSETOFFLOAD, offload as libc::c_ulong) } != 0 {
            return Err(std::io::Error::last_os_error()).context("TUNSETOFFLOAD: /dev/net/tun failed");
        }
    }

    let ipv4_addr: Ipv4Addr = settings
        .ip4
        .unwrap_or(DEFAULT_IPV4_ADDR_STR)
        .parse()
        .context("invalid IPv4 address")?;
    let ipv4_gw: Ipv4Addr = settings
        .gw4
        .unwrap_or(DEFAULT_IPV4_GW_STR)
        .parse()
        .context("invalid IPv4 gateway")?;
    let ipv4_mask: u8 = match settings.mask4 {
        Some(m) => m.parse().context("invalid IPv4 mask")?,
        None => DEFAULT_IPV4_MASK,
    };
    if !(1..=32).contains(&ipv4_mask) {
        bail!("invalid IPv4 mask {}", ipv4_mask);
    }

    // Leak the fd out of `File` so it outlives this function; the launcher
    // owns it for the process lifetime (spec §5: "closing is implicit at
    // process exit").
    std::mem::forget(file);

    Ok(NetConfig {
        tap_fd: Some(fd),
        ipv4_addr,
        ipv4_gw,
        ipv4_mask,
        hostname,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_network_is_none_without_tap() {
        let net = register_net(NetSettings {
            tap: None,
            tap_offload: false,
            ip4: None,
            gw4: None,
            mask4: None,
            hostname: None,
        })
        .unwrap();
        assert!(net.tap_fd.is_none());
        assert_eq!(net.hostname, DEFAULT_HOSTNAME);
    }

    #[test]
    fn ifreq_rejects_overlong_name() {
        assert!(IfReq::named(&"x".repeat(32), 0).is_err());
    }
}
