//! "Bare" version of the IRSA download Lambda implementations.
//!
//! This executable speaks plain JSON-in, JSON-out, which makes it easy to
//! poke at locally with `cargo lambda invoke`. Failures come back as Lambda
//! invocation errors.

use lambda_runtime::{run, service_fn, tracing::info, Error, LambdaEvent};
use serde_json::Value;

use irsa_download_lambda::Services;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let svcs = Services::init().await?;
    let ref_svcs = &svcs;

    run(service_fn(|event: LambdaEvent<Value>| async move {
        let (payload, context) = event.into_parts();
        info!(request_id = %context.request_id, "download request");
        ref_svcs
            .dispatch(context.invoked_function_arn, Some(payload))
            .await
    }))
    .await?;
    Ok(())
}
