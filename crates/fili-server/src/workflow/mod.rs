//! # Druid Workflow
//!
//! A request runs through an ordered list of [`DataRequestHandler`] stages.
//! The list is explicit: [`HandlerChain::new`] checks that stages appear in
//! [`Stage`] order and that the last one dispatches, so a miswired chain is a
//! start-up error rather than a runtime surprise. [`Next`] is the cursor a
//! stage uses to hand the query to the rest of the chain.
//!
//! The outer chain runs once per request and ends at the web service
//! selector, which continues with one of two backend chains (UI or non-UI)
//! built separately from the same configuration.

pub mod handlers;

use crate::availability::PhysicalTableDictionary;
use crate::builder::DruidQueryBuilder;
use crate::cache::{CachePolicy, CacheStrategy, QuerySigningService, ResponseCache};
use crate::config::{CacheMode, Config, ConfigError};
use crate::context::RequestContext;
use crate::error::RequestError;
use crate::processor::{ProcessorOutput, ResponseProcessor, ResultSetResponseProcessor};
use crate::volatility::VolatileIntervalsService;
use fili_core::{DataApiRequest, DruidQuery};
use fili_druid::DruidWebService;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::oneshot;

use handlers::{
    AsyncWebServiceHandler, CacheHandler, DateTimeSortHandler, DebugHandler,
    DruidPartialDataHandler, PaginationHandler, PartialDataHandler, QuerySplitHandler,
    TopNMapperHandler, VolatileDataHandler, WebServiceSelectorHandler, WeightCheckHandler,
};

// =============================================================================
// Stages
// =============================================================================

/// Stage order, outermost first. Declaration order is the only permitted
/// chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    VolatileData,
    PartialData,
    TopNMapper,
    DateTimeSort,
    Pagination,
    WebServiceSelector,
    WeightCheck,
    Debug,
    QuerySplit,
    Cache,
    DruidPartialData,
    AsyncWebService,
}

impl Stage {
    /// Stages allowed to end a chain.
    pub fn dispatches(&self) -> bool {
        matches!(self, Self::WebServiceSelector | Self::AsyncWebService)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("a handler chain needs at least one stage")]
    Empty,

    #[error("stage {next:?} cannot run after {previous:?}")]
    OutOfOrder { previous: Stage, next: Stage },

    #[error("chain ends at {0:?}, which does not dispatch")]
    NotTerminal(Stage),
}

#[async_trait::async_trait]
pub trait DataRequestHandler: Send + Sync {
    fn stage(&self) -> Stage;

    /// `Ok(true)` once the request is handled, inline or by handing off to a
    /// spawned Druid call. An `Err` is a failure raised before dispatch.
    async fn handle_request(
        &self,
        context: &Arc<RequestContext>,
        request: &Arc<DataApiRequest>,
        query: DruidQuery,
        response: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool, RequestError>;
}

/// Cursor into a chain: the stages still to run.
#[derive(Clone)]
pub struct Next {
    handlers: Arc<[Arc<dyn DataRequestHandler>]>,
    position: usize,
}

impl Next {
    pub fn run<'a>(
        self,
        context: &'a Arc<RequestContext>,
        request: &'a Arc<DataApiRequest>,
        query: DruidQuery,
        response: Arc<dyn ResponseProcessor>,
    ) -> BoxFuture<'a, Result<bool, RequestError>> {
        let handler = match self.handlers.get(self.position) {
            Some(h) => h.clone(),
            None => {
                return Box::pin(async {
                    Err(RequestError::Internal("handler chain ended without dispatching".into()))
                })
            }
        };
        let next = Next {
            handlers: self.handlers,
            position: self.position + 1,
        };
        Box::pin(async move {
            tracing::trace!(stage = ?handler.stage(), request_id = %context.request_id, "entering stage");
            handler.handle_request(context, request, query, response, next).await
        })
    }
}

#[derive(Clone)]
pub struct HandlerChain {
    handlers: Arc<[Arc<dyn DataRequestHandler>]>,
}

impl HandlerChain {
    pub fn new(handlers: Vec<Arc<dyn DataRequestHandler>>) -> Result<Self, ChainError> {
        let last = handlers.last().ok_or(ChainError::Empty)?.stage();
        for pair in handlers.windows(2) {
            let (previous, next) = (pair[0].stage(), pair[1].stage());
            if previous >= next {
                return Err(ChainError::OutOfOrder { previous, next });
            }
        }
        if !last.dispatches() {
            return Err(ChainError::NotTerminal(last));
        }
        Ok(Self {
            handlers: handlers.into(),
        })
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.handlers.iter().map(|h| h.stage()).collect()
    }

    pub fn start(&self) -> Next {
        Next {
            handlers: self.handlers.clone(),
            position: 0,
        }
    }
}

// =============================================================================
// Workflow
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Collaborators the chain is built around.
#[derive(Clone)]
pub struct WorkflowDeps {
    pub ui_service: Arc<dyn DruidWebService>,
    pub non_ui_service: Arc<dyn DruidWebService>,
    pub dictionary: Arc<PhysicalTableDictionary>,
    pub volatility: Arc<dyn VolatileIntervalsService>,
    pub cache: Arc<ResponseCache>,
    pub signer: Arc<dyn QuerySigningService>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    pub outer: Vec<Stage>,
    pub ui: Vec<Stage>,
    pub non_ui: Vec<Stage>,
}

pub struct DruidWorkflow {
    chain: HandlerChain,
    topology: Topology,
    builder: DruidQueryBuilder,
    max_filter_clauses: usize,
}

impl DruidWorkflow {
    pub fn build(config: &Config, deps: WorkflowDeps) -> Result<Self, WorkflowError> {
        let cache_mode = config.cache.mode()?;
        let ui = backend_chain(config, &deps, cache_mode, deps.ui_service.clone(), false)?;
        let non_ui = backend_chain(config, &deps, cache_mode, deps.non_ui_service.clone(), true)?;

        let outer: Vec<Arc<dyn DataRequestHandler>> = vec![
            Arc::new(VolatileDataHandler::new(deps.volatility.clone())),
            Arc::new(PartialDataHandler::new(
                deps.dictionary.clone(),
                config.workflow.partial_data,
            )),
            Arc::new(TopNMapperHandler),
            Arc::new(DateTimeSortHandler),
            Arc::new(PaginationHandler),
            Arc::new(WebServiceSelectorHandler::new(
                ui.clone(),
                deps.ui_service.config().clone(),
                non_ui.clone(),
                deps.non_ui_service.config().clone(),
            )),
        ];
        let chain = HandlerChain::new(outer)?;
        let topology = Topology {
            outer: chain.stages(),
            ui: ui.stages(),
            non_ui: non_ui.stages(),
        };
        Ok(Self {
            chain,
            topology,
            builder: DruidQueryBuilder::new(config.workflow.top_n_enabled),
            max_filter_clauses: config.workflow.max_filter_clauses,
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    fn preflight(&self, request: &DataApiRequest) -> Result<(), RequestError> {
        request.validate()?;
        if let Some(filter) = &request.filter {
            let count = filter.clause_count();
            if count > self.max_filter_clauses {
                return Err(RequestError::TooManyFilters {
                    count,
                    limit: self.max_filter_clauses,
                });
            }
        }
        Ok(())
    }

    /// Run one request. The receiver yields exactly one output, whichever
    /// stage or spawned call produces it.
    pub async fn execute(
        &self,
        context: Arc<RequestContext>,
        request: Arc<DataApiRequest>,
    ) -> oneshot::Receiver<ProcessorOutput> {
        let (processor, rx) = ResultSetResponseProcessor::new();
        if let Err(e) = self.preflight(&request) {
            tracing::info!(request_id = %context.request_id, "rejected before dispatch: {}", e);
            processor.fail(e);
            return rx;
        }

        let query = self.builder.build(&request, &context.request_id);
        let response: Arc<dyn ResponseProcessor> = processor.clone();
        if let Err(e) = self
            .chain
            .start()
            .run(&context, &request, query.clone(), response)
            .await
        {
            tracing::info!(request_id = %context.request_id, kind = e.kind(), "request failed: {}", e);
            processor.process(&query, Err(e));
        }
        rx
    }
}

fn backend_chain(
    config: &Config,
    deps: &WorkflowDeps,
    cache_mode: CacheMode,
    service: Arc<dyn DruidWebService>,
    non_ui: bool,
) -> Result<HandlerChain, ChainError> {
    let workflow = &config.workflow;
    let strategy = match cache_mode {
        CacheMode::None => None,
        CacheMode::Ttl => Some(CacheStrategy::Ttl {
            ttl: chrono::Duration::seconds(config.cache.ttl_secs as i64),
        }),
        CacheMode::LocalSignature => Some(CacheStrategy::LocalSignature {
            signer: deps.signer.clone(),
        }),
    };
    let cache = strategy.map(|strategy| {
        Arc::new(CachePolicy::new(
            deps.cache.clone(),
            strategy,
            config.cache.max_entry_bytes,
        ))
    });

    let mut handlers: Vec<Arc<dyn DataRequestHandler>> = Vec::new();
    if non_ui && workflow.query_weight_limit > 0 {
        handlers.push(Arc::new(WeightCheckHandler::new(
            service.clone(),
            workflow.query_weight_limit,
            cache.clone(),
        )));
    }
    handlers.push(Arc::new(DebugHandler));
    if workflow.split.enabled {
        handlers.push(Arc::new(QuerySplitHandler::new(
            workflow.split.policy,
            deps.dictionary.clone(),
        )));
    }
    if let Some(cache) = cache {
        handlers.push(Arc::new(CacheHandler::new(cache)));
    }
    if workflow.uncovered_interval_limit > 0 {
        handlers.push(Arc::new(DruidPartialDataHandler::new(
            workflow.uncovered_interval_limit,
        )));
    }
    handlers.push(Arc::new(AsyncWebServiceHandler::new(service)));
    HandlerChain::new(handlers)
}
