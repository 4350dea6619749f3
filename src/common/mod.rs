use std::net::{SocketAddr, SocketAddrV4};

// map v6 socket addr into v4 if possible
pub fn try_map_v4_addr(addr: SocketAddr) -> SocketAddr {
    if let SocketAddr::V6(v6) = addr {
        if let Some(v4a) = v6.ip().to_ipv4_mapped() {
            SocketAddr::V4(SocketAddrV4::new(v4a, v6.port()))
        } else {
            addr
        }
    } else {
        addr
    }
}

#[cfg(not(windows))]
pub fn set_keepalive(stream: &tokio::net::TcpStream) -> anyhow::Result<()> {
    use anyhow::Context;
    use nix::sys::socket::{setsockopt, sockopt::KeepAlive};
    setsockopt(stream, KeepAlive, &true).context("setsockopt")
}

#[cfg(windows)]
pub fn set_keepalive(_stream: &tokio::net::TcpStream) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_map_v4_addr() {
        let mapped: SocketAddr = "[::ffff:1.2.3.4]:4001".parse().unwrap();
        assert_eq!(try_map_v4_addr(mapped), "1.2.3.4:4001".parse().unwrap());

        let v6: SocketAddr = "[2001:db8::1]:4001".parse().unwrap();
        assert_eq!(try_map_v4_addr(v6), v6);

        let v4: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        assert_eq!(try_map_v4_addr(v4), v4);
    }

    #[tokio::test]
    async fn test_set_keepalive() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        assert!(set_keepalive(&client).is_ok());
    }
}
