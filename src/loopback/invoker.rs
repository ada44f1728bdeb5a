//! In-process invocation of registered handlers.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::Method;
use futures_util::FutureExt;
use tokio::sync::oneshot;

use crate::context::ExecutionContext;
use crate::error::{BoxError, FetchError};
use crate::http::request::split_target;
use crate::http::{CallRequest, FetchResponse, Reply};
use crate::loopback::guard::GuardMode;
use crate::loopback::FetchOptions;
use crate::routing::Handler;

/// Dispatch a relative target to the handler registered for it.
pub(crate) async fn invoke(
    ctx: &ExecutionContext,
    target: &str,
    options: FetchOptions,
    guard: GuardMode,
) -> Result<FetchResponse, FetchError> {
    if let Some(method) = options.requested_method() {
        if method != Method::GET {
            tracing::warn!(
                request_id = %ctx.id(),
                target = %target,
                method = %method,
                "Loopback calls are always GET, ignoring requested method"
            );
        }
    }

    let (path, query) = split_target(target);
    let matched = ctx.registry().resolve(&Method::GET, path)?;

    tracing::debug!(
        request_id = %ctx.id(),
        path = %path,
        template = %matched.template,
        "Loopback dispatch"
    );

    let request = CallRequest::new(
        Method::GET,
        target.to_string(),
        path.to_string(),
        matched.params,
        query,
        options.into_headers(),
        ctx.cookies().clone(),
        Bytes::new(),
        guard,
    );
    let (reply, receiver) = Reply::capture(ctx.cookies().clone(), ctx.outer().clone(), guard);

    run_handler(matched.handler, request, reply, receiver, path).await
}

/// Run a handler and wait for the response it finalizes.
///
/// A handler error or panic fails the call unless the reply was already
/// finalized, in which case the finalized response stands.
pub(crate) async fn run_handler(
    handler: Arc<dyn Handler>,
    request: CallRequest,
    reply: Reply,
    mut receiver: oneshot::Receiver<FetchResponse>,
    path: &str,
) -> Result<FetchResponse, FetchError> {
    let outcome = AssertUnwindSafe(handler.call(request, reply))
        .catch_unwind()
        .await;

    let failure: BoxError = match outcome {
        Ok(Ok(())) => {
            return receiver.await.map_err(|_| FetchError::NoResponse {
                path: path.to_string(),
            })
        }
        Ok(Err(e)) => e,
        Err(panic) => panic_message(panic).into(),
    };

    match receiver.try_recv() {
        Ok(response) => {
            tracing::warn!(path = %path, error = %failure, "Handler failed after responding");
            Ok(response)
        }
        Err(_) => Err(FetchError::Handler {
            path: path.to_string(),
            source: failure,
        }),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("handler panicked: {msg}")
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CookieJar, OuterResponse};
    use crate::routing::Params;
    use axum::http::HeaderMap;

    fn pair() -> (CallRequest, Reply, oneshot::Receiver<FetchResponse>) {
        let jar = CookieJar::new();
        let request = CallRequest::new(
            Method::GET,
            "/t".into(),
            "/t".into(),
            Params::default(),
            Default::default(),
            HeaderMap::new(),
            jar.clone(),
            Bytes::new(),
            GuardMode::Permissive,
        );
        let (reply, rx) = Reply::capture(jar, OuterResponse::new(), GuardMode::Permissive);
        (request, reply, rx)
    }

    #[tokio::test]
    async fn test_handler_error_is_wrapped() {
        let handler: Arc<dyn Handler> = Arc::new(|_req: CallRequest, _res: Reply| async {
            Err::<(), _>(FetchError::MalformedOptions("boom".into()))
        });
        let (req, reply, rx) = pair();
        let err = run_handler(handler, req, reply, rx, "/t").await.unwrap_err();
        assert!(matches!(err, FetchError::Handler { ref path, .. } if path == "/t"));
        assert!(matches!(err.root(), FetchError::MalformedOptions(_)));
    }

    #[tokio::test]
    async fn test_handler_panic_is_wrapped() {
        let handler: Arc<dyn Handler> = Arc::new(|_req: CallRequest, _res: Reply| async {
            if true {
                panic!("kaboom");
            }
            Ok::<(), FetchError>(())
        });
        let (req, reply, rx) = pair();
        let err = run_handler(handler, req, reply, rx, "/t").await.unwrap_err();
        assert!(err.to_string().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_missing_response() {
        let handler: Arc<dyn Handler> =
            Arc::new(|_req: CallRequest, _res: Reply| async { Ok::<(), FetchError>(()) });
        let (req, reply, rx) = pair();
        assert!(matches!(
            run_handler(handler, req, reply, rx, "/t").await,
            Err(FetchError::NoResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_response_before_error_stands() {
        let handler: Arc<dyn Handler> = Arc::new(|_req: CallRequest, res: Reply| async move {
            res.send("done")?;
            Err::<(), _>(FetchError::AlreadySent)
        });
        let (req, reply, rx) = pair();
        let response = run_handler(handler, req, reply, rx, "/t").await.unwrap();
        assert_eq!(response.text().unwrap(), "done");
    }

    #[tokio::test]
    async fn test_reply_from_spawned_task() {
        let handler: Arc<dyn Handler> = Arc::new(|_req: CallRequest, res: Reply| async move {
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                let _ = res.send("later");
            });
            Ok::<(), FetchError>(())
        });
        let (req, reply, rx) = pair();
        let response = run_handler(handler, req, reply, rx, "/t").await.unwrap();
        assert_eq!(response.text().unwrap(), "later");
    }
}
