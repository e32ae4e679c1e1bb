//! "Proxy event" version of the IRSA download Lambda implementations.
//!
//! This executable expects to be invoked through AWS API Gateway's "proxy
//! event" protocol. Unlike the bare version, request failures are turned
//! into HTTP 400 responses with a JSON error body, which is what the
//! download dialog knows how to show to the user.

use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, RequestPayloadExt, Response};
use lambda_runtime::tracing::warn;
use serde_json::{json, Value};

use irsa_download_lambda::Services;

fn json_response(status: u16, body: &Value) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body)?))?)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let svcs = Services::init().await?;
    let ref_svcs = &svcs;

    run(service_fn(|req: Request| async move {
        let context = req.lambda_context();

        let payload: Option<Value> = match req.payload() {
            Ok(p) => p,
            Err(e) => {
                return json_response(400, &json!({ "error": format!("unable to process request: {e}") }))
            }
        };

        match ref_svcs
            .dispatch(context.invoked_function_arn, payload)
            .await
        {
            Ok(result) => json_response(200, &result),
            Err(e) => {
                warn!(request_id = %context.request_id, "request failed: {e}");
                json_response(400, &json!({ "error": e.to_string() }))
            }
        }
    }))
    .await?;
    Ok(())
}
