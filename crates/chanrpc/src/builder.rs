//! Engine construction.

use chanrpc_common::transport::{Channel, Codec, Encoder, Serializer};
use chanrpc_common::{ErrorObject, Id, ParameterStructure, Request, ServiceError};
use futures_util::future::{self, BoxFuture, FutureExt};
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

use crate::abort::AbortSignal;
use crate::config::{EngineConfig, LogLevel, Strictness};
use crate::engine::{Engine, EngineInner, IdGenerator};
use crate::error::{Result, RpcError};
use crate::generator::IteratorHost;
use crate::logging::{LogHooks, Logger, TracingLogger};
use crate::pending::PendingTable;
use crate::recovery::{default_error_mapper, ErrorMapper};
use crate::service::Service;

/// Builder for [`Engine`].
///
/// Only the channel is required. Everything else defaults to: an empty local
/// service, no serialization, strict mode, default logging through `tracing`,
/// sequential numeric ids and by-position parameters.
#[derive(Default)]
pub struct EngineBuilder {
    implementation: Option<BoxFuture<'static, std::result::Result<Service, ServiceError>>>,
    channel: Option<BoxFuture<'static, Channel>>,
    serializer: Option<Arc<dyn Serializer>>,
    encoder: Option<Arc<dyn Encoder>>,
    strict: Strictness,
    log: LogLevel,
    logger: Option<Arc<dyn Logger>>,
    id_generator: Option<IdGenerator>,
    error_mapper: Option<ErrorMapper>,
    parameter_structure: ParameterStructure,
    prefer_local_implementation: bool,
    signal: Option<AbortSignal>,
    force_signal: Option<AbortSignal>,
    iterator_idle_timeout: Option<Duration>,
}

impl EngineBuilder {
    /// The service exposed to the peer.
    pub fn implementation(mut self, service: Service) -> Self {
        self.implementation = Some(future::ready(Ok(service)).boxed());
        self
    }

    /// A service that becomes available later.
    ///
    /// Requests arriving before it resolves wait for it. If it fails, every
    /// request is answered with that error.
    pub fn implementation_future<F>(mut self, service: F) -> Self
    where
        F: Future<Output = std::result::Result<Service, ServiceError>> + Send + 'static,
    {
        self.implementation = Some(service.boxed());
        self
    }

    pub fn channel(mut self, channel: Channel) -> Self {
        self.channel = Some(future::ready(channel).boxed());
        self
    }

    /// A channel that becomes available later. Outbound calls wait for it.
    pub fn channel_future<F>(mut self, channel: F) -> Self
    where
        F: Future<Output = Channel> + Send + 'static,
    {
        self.channel = Some(channel.boxed());
        self
    }

    /// Mutually exclusive with [`encoder`](Self::encoder).
    pub fn serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    /// Mutually exclusive with [`serializer`](Self::serializer).
    pub fn encoder(mut self, encoder: impl Encoder + 'static) -> Self {
        self.encoder = Some(Arc::new(encoder));
        self
    }

    pub fn strict(mut self, strict: impl Into<Strictness>) -> Self {
        self.strict = strict.into();
        self
    }

    pub fn log(mut self, log: impl Into<LogLevel>) -> Self {
        self.log = log.into();
        self
    }

    /// Replaces the default `tracing` logger.
    pub fn logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    pub fn id_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> Id + Send + Sync + 'static,
    {
        self.id_generator = Some(Arc::new(generator));
        self
    }

    /// Controls how local errors are turned into wire error objects.
    pub fn error_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&ServiceError, &Request) -> ErrorObject + Send + Sync + 'static,
    {
        self.error_mapper = Some(Arc::new(mapper));
        self
    }

    pub fn parameter_structure(mut self, structure: ParameterStructure) -> Self {
        self.parameter_structure = structure;
        self
    }

    pub fn prefer_local_implementation(mut self, prefer: bool) -> Self {
        self.prefer_local_implementation = prefer;
        self
    }

    /// Soft signal: once aborted, new calls fail; calls in flight still settle.
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Forced signal: once aborted, every pending call is rejected and new
    /// inbound requests are answered with the abort reason.
    pub fn force_signal(mut self, signal: AbortSignal) -> Self {
        self.force_signal = Some(signal);
        self
    }

    pub fn iterator_idle_timeout(mut self, timeout: Duration) -> Self {
        self.iterator_idle_timeout = Some(timeout);
        self
    }

    /// Builds the engine and attaches it to the channel.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<Engine> {
        let runtime = Handle::try_current()
            .map_err(|_| RpcError::Config("an engine must be built inside a Tokio runtime".to_string()))?;

        let codec = match (self.serializer, self.encoder) {
            (Some(_), Some(_)) => {
                return Err(RpcError::Config(
                    "serializer and encoder are mutually exclusive".to_string(),
                ))
            }
            (Some(serializer), None) => Codec::Serializer(serializer),
            (None, Some(encoder)) => Codec::Encoder(encoder),
            (None, None) => Codec::new(),
        };

        let channel = self
            .channel
            .ok_or_else(|| RpcError::Config("a channel is required".to_string()))?
            .shared();

        let local = self
            .implementation
            .unwrap_or_else(|| future::ready(Ok(Service::default())).boxed())
            .map(|service| service.map(Arc::new))
            .boxed()
            .shared();
        // Polls a ready implementation once so later lookups can peek at it
        let _ = local.clone().now_or_never();

        let log = self.log.options();
        let logger = self
            .logger
            .unwrap_or_else(|| Arc::new(TracingLogger::new(log.pretty)));
        let ids = self.id_generator.unwrap_or_else(sequential_ids);
        let error_mapper = self
            .error_mapper
            .unwrap_or_else(|| default_error_mapper(log.send_local_stack));

        let config = EngineConfig {
            strict: self.strict,
            log,
            parameter_structure: self.parameter_structure,
            prefer_local_implementation: self.prefer_local_implementation,
            iterator_idle_timeout: self.iterator_idle_timeout,
        };

        tracing::debug!("building engine with {:?}", config);

        Ok(Engine::start(EngineInner {
            local,
            channel,
            codec,
            pending: Arc::new(PendingTable::default()),
            ids,
            error_mapper,
            logs: LogHooks::new(logger, log),
            signal: self.signal.unwrap_or_default(),
            force_signal: self.force_signal.unwrap_or_default(),
            iterators: IteratorHost::new(config.iterator_idle_timeout),
            stubs: Default::default(),
            detach: Default::default(),
            shutdown: Default::default(),
            runtime,
            config,
        }))
    }
}

fn sequential_ids() -> IdGenerator {
    let next = Arc::new(AtomicI64::new(0));
    Arc::new(move || Id::Number(next.fetch_add(1, Ordering::Relaxed).into()))
}
