//! Provider/orchestrator: reads one connection configuration, wires the
//! pipeline assembler to the matching server facade, and owns the codec
//! registries for the lifetime of the process.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tracing::debug;

use flowlink_api::config::{ConnectionConfiguration, TransportProtocol};
use flowlink_api::connection::{OutboundConnection, SwitchConnectionHandler};
use flowlink_api::extensibility::{OfDeserializer, OfSerializer};
use flowlink_api::keys::{DeserializerKey, ExperimenterIdKey, SerializerKey};

use crate::detector::VersionDetector;
use crate::error::{ConnectionError, Result};
use crate::initiator::ConnectionInitiator;
use crate::pipeline::PipelineContext;
use crate::registry::{DeserializerRegistry, SerializerRegistry};
use crate::server::{ServerFacade, TcpServerFacade};
use crate::stats::{ConnectionStatistics, StatisticsSnapshot};
use crate::tls::TlsContext;
use crate::udp::UdpServerFacade;

enum ProviderState {
    Created,
    Started {
        facade: Arc<dyn ServerFacade>,
        initiator: Option<Arc<ConnectionInitiator>>,
    },
    ShutDown {
        facade: Arc<dyn ServerFacade>,
    },
}

/// One listening (or dialing) OpenFlow endpoint plus its codec registries.
///
/// Construct once per configured endpoint, register codecs, set the switch
/// connection handler, then `startup()`. Registration stays open after
/// startup; protocol extensions may add experimenter codecs at any time.
pub struct ConnectionProvider {
    config: Arc<ConnectionConfiguration>,
    serializers: Arc<SerializerRegistry>,
    deserializers: Arc<DeserializerRegistry>,
    stats: Arc<ConnectionStatistics>,
    detector: Arc<VersionDetector>,
    handler: Mutex<Option<Arc<dyn SwitchConnectionHandler>>>,
    state: Mutex<ProviderState>,
}

impl ConnectionProvider {
    /// Creates a provider for `config` with empty codec registries.
    pub fn new(config: ConnectionConfiguration) -> Self {
        let stats = Arc::new(ConnectionStatistics::new());
        Self {
            config: Arc::new(config),
            serializers: Arc::new(SerializerRegistry::new()),
            deserializers: Arc::new(DeserializerRegistry::new()),
            detector: Arc::new(VersionDetector::new(stats.clone())),
            stats,
            handler: Mutex::new(None),
            state: Mutex::new(ProviderState::Created),
        }
    }

    /// The configuration this provider was built from.
    pub fn configuration(&self) -> &ConnectionConfiguration {
        &self.config
    }

    /// Sets the controller-side hook for new connections. Must happen
    /// before `startup()`.
    pub fn set_switch_connection_handler(&self, handler: Arc<dyn SwitchConnectionHandler>) {
        debug!("switch connection handler set");
        *self.handler.lock().unwrap() = Some(handler);
    }

    /// Registers a serializer; an existing entry under the same key is
    /// replaced.
    pub fn register_serializer(&self, key: SerializerKey, serializer: Arc<dyn OfSerializer>) {
        self.serializers.register(key, serializer);
    }

    /// Removes a serializer registration; returns whether one existed.
    pub fn unregister_serializer(&self, key: &SerializerKey) -> bool {
        self.serializers.unregister(key)
    }

    /// Registers a deserializer; an existing entry under the same key is
    /// replaced.
    pub fn register_deserializer(&self, key: DeserializerKey, deserializer: Arc<dyn OfDeserializer>) {
        self.deserializers.register(key, deserializer);
    }

    /// Removes a deserializer registration; returns whether one existed.
    pub fn unregister_deserializer(&self, key: &DeserializerKey) -> bool {
        self.deserializers.unregister(key)
    }

    /// Registers a vendor-scoped serializer.
    pub fn register_experimenter_serializer(
        &self,
        key: ExperimenterIdKey,
        serializer: Arc<dyn OfSerializer>,
    ) {
        self.serializers.register(SerializerKey::Experimenter(key), serializer);
    }

    /// Registers a vendor-scoped deserializer.
    pub fn register_experimenter_deserializer(
        &self,
        key: ExperimenterIdKey,
        deserializer: Arc<dyn OfDeserializer>,
    ) {
        self.deserializers
            .register(DeserializerKey::Experimenter(key), deserializer);
    }

    /// Enables or disables PACKET_IN load shedding across every connection
    /// of this provider.
    pub fn set_filter_packet_in(&self, enabled: bool) {
        self.detector.set_filter_packet_in(enabled);
    }

    /// Current statistics counters.
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    /// Starts the endpoint and resolves with the bound local address.
    ///
    /// TLS material is validated before anything binds, so a bad keystore
    /// fails here with no socket left open. Calling `startup()` twice
    /// without an intervening successful lifecycle is an error, as is
    /// starting a provider that was already shut down.
    pub async fn startup(&self) -> Result<SocketAddr> {
        let handler = self
            .handler
            .lock()
            .unwrap()
            .clone()
            .ok_or(ConnectionError::HandlerNotSet)?;

        if !matches!(*self.state.lock().unwrap(), ProviderState::Created) {
            return Err(ConnectionError::AlreadyStarted);
        }

        let tls = match (self.config.transport, &self.config.tls) {
            (TransportProtocol::Tls, Some(tls_config)) => {
                Some(Arc::new(TlsContext::from_configuration(tls_config)?))
            }
            (TransportProtocol::Tls, None) => {
                return Err(ConnectionError::Tls {
                    reason: "TLS transport requires tls configuration".to_string(),
                })
            }
            _ => None,
        };

        let ctx = PipelineContext {
            config: self.config.clone(),
            handler,
            serializers: self.serializers.clone(),
            deserializers: self.deserializers.clone(),
            detector: self.detector.clone(),
            stats: self.stats.clone(),
        };

        let (facade, initiator): (Arc<dyn ServerFacade>, Option<Arc<ConnectionInitiator>>) =
            match self.config.transport {
                TransportProtocol::Tcp | TransportProtocol::Tls => {
                    let facade = Arc::new(TcpServerFacade::new(ctx.clone(), tls.clone()));
                    let initiator = Arc::new(ConnectionInitiator::new(
                        ctx,
                        tls,
                        facade.close_watch(),
                    ));
                    (facade, Some(initiator))
                }
                TransportProtocol::Udp => (Arc::new(UdpServerFacade::new(ctx)), None),
            };

        {
            let mut state = self.state.lock().unwrap();
            if !matches!(*state, ProviderState::Created) {
                return Err(ConnectionError::AlreadyStarted);
            }
            *state = ProviderState::Started {
                facade: facade.clone(),
                initiator,
            };
        }

        tokio::spawn(facade.clone().run());

        match facade.online().wait().await {
            Ok(addr) => Ok(addr),
            Err(reason) => {
                // The facade never came up; its terminated signal has fired
                // and the provider cannot be restarted.
                *self.state.lock().unwrap() = ProviderState::ShutDown { facade };
                Err(ConnectionError::StartupFailed { reason })
            }
        }
    }

    /// Shuts the endpoint down and waits until every owned task has
    /// terminated. Idempotent: later calls observe the same completion.
    pub async fn shutdown(&self) -> Result<()> {
        let facade = {
            let mut state = self.state.lock().unwrap();
            match &*state {
                ProviderState::Created => return Err(ConnectionError::NotStarted),
                ProviderState::Started { facade, .. } => {
                    let facade = facade.clone();
                    *state = ProviderState::ShutDown {
                        facade: facade.clone(),
                    };
                    facade
                }
                ProviderState::ShutDown { facade } => facade.clone(),
            }
        };
        facade.shutdown().wait().await;
        Ok(())
    }

    /// Dials out to a switch at `host:port` over this provider's transport.
    ///
    /// Unavailable on UDP and before startup. Connect failures surface as
    /// the returned error; no retry is attempted here.
    pub async fn initiate_connection(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Arc<dyn OutboundConnection>> {
        let initiator = {
            let state = self.state.lock().unwrap();
            match &*state {
                ProviderState::Started {
                    initiator: Some(initiator),
                    ..
                } => initiator.clone(),
                ProviderState::Started { initiator: None, .. } => {
                    return Err(ConnectionError::UnsupportedTransport {
                        transport: "UDP".to_string(),
                    })
                }
                _ => return Err(ConnectionError::NotStarted),
            }
        };
        initiator.initiate_connection(host, port).await
    }
}
