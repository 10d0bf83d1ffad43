//! DNS proxy server loop.
//!
//! Receives datagrams on the listening socket, applies the filter rules and
//! either answers locally or relays the query to the upstream resolver.
//! Requests are served one at a time in arrival order. The loop checks a
//! shared stop flag between bounded waits for readability.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hickory_proto::rr::RecordType;
use tokio::net::UdpSocket;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::dns::engine;
use crate::dns::filter::{Action, FilterRule};
use crate::dns::upstream::{UdpUpstream, Upstream};
use crate::dns::wire::Message;
use crate::error::{DecisionError, Error, NetworkError, Result};
use crate::metrics;

/// Capacity of the buffer client datagrams are received into.
pub const RECV_BUFFER_SIZE: usize = 1024;

/// Counters for one run of the server loop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerStats {
    pub received: u64,
    pub blocked: u64,
    pub refused: u64,
    pub redirected: u64,
    pub forwarded: u64,
    pub malformed: u64,
    pub errors: u64,
}

impl ServerStats {
    fn record_action(&mut self, action: Action) {
        match action {
            Action::NotFound => self.blocked += 1,
            Action::Refuse => self.refused += 1,
            Action::Redirect(_) => self.redirected += 1,
        }
    }
}

/// What to do with a received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Relay the datagram unmodified to the upstream resolver.
    Forward,
    /// Send these bytes back to the client.
    Respond { action: Action, response: Vec<u8> },
}

/// Applies the filter rules to raw datagrams.
///
/// Holds no socket, so it can be exercised without any network access.
#[derive(Debug, Clone)]
pub struct QueryHandler {
    rules: Arc<[FilterRule]>,
}

impl QueryHandler {
    pub fn new(rules: impl Into<Arc<[FilterRule]>>) -> Self {
        Self {
            rules: rules.into(),
        }
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Decode `datagram` and decide how to serve it.
    ///
    /// A redirect that cannot answer the matched question's type is
    /// forwarded instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Wire`] if the datagram does not decode, and
    /// [`Error::Decision`] if the synthesized response cannot be built or
    /// encoded.
    #[instrument(level = "debug", skip_all, fields(id, qname, qtype))]
    pub fn handle(&self, datagram: &[u8]) -> Result<Outcome> {
        let request = Message::decode(datagram)?;
        record_request(&request);

        let Some(found) = engine::find_match(&request, &self.rules) else {
            debug!("no rule matched");
            return Ok(Outcome::Forward);
        };

        let action = found.rule.action();
        let response = match engine::respond(&request, found) {
            Ok(response) => response,
            Err(err @ DecisionError::AddressFamilyMismatch { .. }) => {
                warn!(host = found.rule.host(), %err, "redirect not applicable, forwarding");
                return Ok(Outcome::Forward);
            }
            Err(err) => return Err(err.into()),
        };

        debug!(action = action.label(), rule = found.rule.host(), "rule matched");
        let response = response.encode().map_err(DecisionError::Encode)?;
        Ok(Outcome::Respond { action, response })
    }
}

fn record_request(request: &Message) {
    let span = tracing::Span::current();
    span.record("id", request.id());
    if let Some(question) = request.questions.first() {
        span.record("qname", tracing::field::display(&question.name));
        span.record(
            "qtype",
            tracing::field::display(RecordType::from(question.qtype)),
        );
    }
}

/// The proxy server: listening socket, upstream and rules.
pub struct Server<U: Upstream> {
    socket: UdpSocket,
    upstream: U,
    handler: QueryHandler,
    read_timeout: Duration,
    running: Arc<AtomicBool>,
}

impl Server<UdpUpstream> {
    /// Bind the listening socket and connect to the configured upstream.
    pub async fn bind(config: &Config) -> Result<Self> {
        let upstream = UdpUpstream::connect(config.upstream, config.upstream_timeout).await?;
        Self::with_upstream(config, upstream).await
    }
}

impl<U: Upstream> Server<U> {
    /// Bind the listening socket, relaying to the given upstream.
    pub async fn with_upstream(config: &Config, upstream: U) -> Result<Self> {
        let socket = UdpSocket::bind(config.listen)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: config.listen,
                source,
            })?;

        Ok(Self {
            socket,
            upstream,
            handler: QueryHandler::new(config.filters.clone()),
            read_timeout: config.read_timeout,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Address the listening socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Flag that keeps the loop running. Store `false` to stop it; the loop
    /// notices within one read timeout once the current request completes.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until the shutdown flag is cleared.
    ///
    /// Both sockets are closed when this returns.
    pub async fn run(self) -> Result<ServerStats> {
        let mut stats = ServerStats::default();
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        info!(
            listen = ?self.socket.local_addr().ok(),
            rules = self.handler.rules().len(),
            "dnsgate serving"
        );

        while self.running.load(Ordering::SeqCst) {
            match tokio::time::timeout(self.read_timeout, self.socket.readable()).await {
                Err(_elapsed) => continue,
                Ok(Err(err)) => {
                    warn!(%err, "listening socket failed");
                    stats.errors += 1;
                    continue;
                }
                Ok(Ok(())) => {}
            }

            let (len, client) = match self.socket.try_recv_from(&mut buf) {
                Ok(received) => received,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => {
                    warn!(%err, "failed to receive datagram");
                    stats.errors += 1;
                    continue;
                }
            };
            stats.received += 1;
            self.serve(&buf[..len], client, &mut stats).await;
        }

        info!(?stats, "dnsgate stopped");
        Ok(stats)
    }

    #[instrument(skip_all, fields(%client))]
    async fn serve(&self, datagram: &[u8], client: SocketAddr, stats: &mut ServerStats) {
        let outcome = match self.handler.handle(datagram) {
            Ok(outcome) => outcome,
            Err(Error::Wire(err)) => {
                debug!(len = datagram.len(), %err, "dropping malformed datagram");
                stats.malformed += 1;
                metrics::record_dropped("malformed");
                return;
            }
            Err(err @ Error::Decision(_)) => {
                warn!(%err, "dropping query, no response could be built");
                stats.errors += 1;
                metrics::record_dropped("encode");
                return;
            }
            Err(err) => {
                warn!(%err, "failed to handle datagram");
                stats.errors += 1;
                metrics::record_dropped("error");
                return;
            }
        };

        let reply = match outcome {
            Outcome::Respond { action, response } => {
                stats.record_action(action);
                metrics::record_query(action.label());
                response
            }
            Outcome::Forward => match self.upstream.exchange(datagram).await {
                Ok(reply) => {
                    stats.forwarded += 1;
                    metrics::record_query("forward");
                    reply
                }
                Err(err) => {
                    warn!(%err, "upstream exchange failed");
                    stats.errors += 1;
                    metrics::record_dropped("upstream");
                    return;
                }
            },
        };

        if let Err(err) = self.socket.send_to(&reply, client).await {
            warn!(%err, "failed to send reply");
            stats.errors += 1;
            metrics::record_dropped("send");
        }
    }
}
