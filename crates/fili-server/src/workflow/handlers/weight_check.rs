use crate::cache::CachePolicy;
use crate::context::RequestContext;
use crate::error::RequestError;
use crate::processor::ResponseProcessor;
use crate::weight::{needs_weight_check, parse_weight, weight_evaluation_query};
use crate::workflow::{DataRequestHandler, Next, Stage};
use fili_core::{DataApiRequest, DruidQuery};
use fili_druid::DruidWebService;
use std::sync::Arc;

/// Non-UI only. Runs a row-count pre-flight for queries whose worst case
/// could exceed the limit, and continues the chain only when the count fits.
///
/// With a cache configured, a query whose own response is already cached
/// skips the pre-flight, and weight counts are cached like any other
/// response.
pub struct WeightCheckHandler {
    service: Arc<dyn DruidWebService>,
    limit: u64,
    cache: Option<Arc<CachePolicy>>,
}

impl WeightCheckHandler {
    pub fn new(service: Arc<dyn DruidWebService>, limit: u64, cache: Option<Arc<CachePolicy>>) -> Self {
        Self { service, limit, cache }
    }

    fn response_is_cached(&self, context: &RequestContext, query: &DruidQuery) -> bool {
        match &self.cache {
            Some(cache) if context.read_cache() => {
                cache.slot(query).is_some_and(|slot| cache.is_live(&slot))
            }
            _ => false,
        }
    }
}

/// Rejects or continues the chain once the weight is known.
#[allow(clippy::too_many_arguments)]
async fn settle(
    weight: Result<u64, RequestError>,
    limit: u64,
    context: &Arc<RequestContext>,
    request: &Arc<DataApiRequest>,
    query: DruidQuery,
    weight_query: &DruidQuery,
    response: Arc<dyn ResponseProcessor>,
    next: Next,
) -> Result<bool, RequestError> {
    match weight {
        Ok(weight) if weight > limit => {
            tracing::warn!(
                request_id = %context.request_id,
                weight,
                limit,
                "query rejected by weight check"
            );
            response.process(&query, Err(RequestError::RowLimitReached { weight, limit }));
            Ok(true)
        }
        Ok(weight) => {
            tracing::debug!(request_id = %context.request_id, weight, "weight check passed");
            next.run(context, request, query, response).await
        }
        Err(e) => {
            response.process(weight_query, Err(e));
            Ok(true)
        }
    }
}

#[async_trait::async_trait]
impl DataRequestHandler for WeightCheckHandler {
    fn stage(&self) -> Stage {
        Stage::WeightCheck
    }

    async fn handle_request(
        &self,
        context: &Arc<RequestContext>,
        request: &Arc<DataApiRequest>,
        query: DruidQuery,
        response: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool, RequestError> {
        if !needs_weight_check(request, &query, self.limit) {
            return next.run(context, request, query, response).await;
        }
        if self.response_is_cached(context, &query) {
            tracing::debug!(request_id = %context.request_id, "response cached, weight check skipped");
            return next.run(context, request, query, response).await;
        }

        let weight_query = weight_evaluation_query(&query);
        let weight_slot = self
            .cache
            .as_ref()
            .and_then(|cache| Some((cache.clone(), cache.slot(&weight_query)?)));

        if context.read_cache() {
            if let Some(cached) = weight_slot
                .as_ref()
                .and_then(|(cache, slot)| cache.lookup(slot))
            {
                let weight = parse_weight(&cached.body);
                return settle(weight, self.limit, context, request, query, &weight_query, response, next)
                    .await;
            }
        }

        let service = self.service.clone();
        let limit = self.limit;
        let context = context.clone();
        let request = request.clone();
        tokio::spawn(async move {
            let weight = RequestError::from_outcome(service.post_query(&weight_query).await).and_then(|r| {
                if let Some((cache, slot)) = &weight_slot {
                    cache.store(slot, &r);
                }
                parse_weight(&r.body)
            });
            let settled = settle(
                weight,
                limit,
                &context,
                &request,
                query.clone(),
                &weight_query,
                response.clone(),
                next,
            )
            .await;
            if let Err(e) = settled {
                response.process(&query, Err(e));
            }
        });
        Ok(true)
    }
}
