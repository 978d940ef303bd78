//! Client commands against a running state server.

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{Map, Value};
use statebus_api::rpc::{
    ConfigSubscribeRequest, GetRequest, RpcClient, SetRequest, SetResponse, UpdateOperation,
};
use statebus_api::{Notification, Path, TypedValue, Update};
use url::Url;

use crate::cli::{DeleteArgs, GetArgs, GlobalOpts, SetArgs, TargetArgs};
use crate::error::CliError;
use crate::output;

const STATE_ENTRY: &str = "state-entry";

// ── Views ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct UpdateView {
    path: String,
    value: Value,
}

#[derive(Debug, Serialize)]
struct NotificationView {
    timestamp: i64,
    updates: Vec<UpdateView>,
}

impl From<&Notification> for NotificationView {
    fn from(n: &Notification) -> Self {
        Self {
            timestamp: n.timestamp,
            updates: n
                .update
                .iter()
                .map(|u| UpdateView {
                    path: u.path.to_xpath(),
                    value: u.val.to_json(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResultView {
    path: String,
    op: UpdateOperation,
}

#[derive(Debug, Serialize)]
struct SetView {
    timestamp: i64,
    results: Vec<ResultView>,
}

impl From<&SetResponse> for SetView {
    fn from(resp: &SetResponse) -> Self {
        Self {
            timestamp: resp.timestamp,
            results: resp
                .response
                .iter()
                .map(|r| ResultView {
                    path: r.path.to_xpath(),
                    op: r.op,
                })
                .collect(),
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

pub async fn get(args: &GetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = args
        .paths
        .iter()
        .map(|p| Path::from_xpath(p))
        .collect::<Result<Vec<_>, _>>()?;
    let mut client = connect(global).await?;
    let response = client
        .get(GetRequest {
            prefix: prefix(&args.target),
            path,
        })
        .await?;
    close(client).await;

    let views: Vec<NotificationView> = response.notification.iter().map(NotificationView::from).collect();
    output::print_output(&output::render(global.output, &views)?);
    Ok(())
}

pub async fn set(args: &SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    for xpath in &args.paths {
        Path::from_xpath(xpath)?;
    }
    let mut body = Map::new();
    body.insert("path".into(), Value::from(args.paths.clone()));
    if let Some(ref prefix) = args.prefix {
        body.insert("prefix".into(), Value::from(prefix.clone()));
    }

    let request = SetRequest {
        prefix: prefix(&args.target),
        replace: vec![Update::new(
            entry_path(&args.name),
            TypedValue::json_ietf(&Value::Object(body)),
        )],
        ..SetRequest::default()
    };
    send_set(request, global).await
}

pub async fn delete(args: &DeleteArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let request = SetRequest {
        prefix: prefix(&args.target),
        delete: vec![entry_path(&args.name)],
        ..SetRequest::default()
    };
    send_set(request, global).await
}

/// Print the running configuration, then every change until the server
/// goes away or Ctrl-C.
pub async fn watch(args: &TargetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let client = connect(global).await?;
    let stream = client
        .subscribe(ConfigSubscribeRequest {
            prefix: prefix(args),
        })
        .await?;
    let mut stream = Box::pin(stream);

    loop {
        let next = tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(notification)) => {
                let view = NotificationView::from(&notification);
                output::print_output(&output::render(global.output, &view)?);
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                tracing::info!("state server closed the subscription");
                break;
            }
        }
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────

async fn connect(global: &GlobalOpts) -> Result<RpcClient, CliError> {
    let url: Url = global.server.parse().map_err(|_| CliError::Validation {
        field: "server".into(),
        reason: format!("invalid URL: {}", global.server),
    })?;
    RpcClient::connect(&url)
        .await
        .map_err(|source| CliError::ConnectionFailed {
            url: url.to_string(),
            source,
        })
}

async fn close(client: RpcClient) {
    if let Err(e) = client.close().await {
        tracing::debug!(error = %e, "closing RPC connection failed");
    }
}

async fn send_set(request: SetRequest, global: &GlobalOpts) -> Result<(), CliError> {
    let mut client = connect(global).await?;
    let response = client.set(request).await?;
    close(client).await;
    output::print_output(&output::render(global.output, &SetView::from(&response))?);
    Ok(())
}

fn prefix(args: &TargetArgs) -> Option<Path> {
    Some(Path::root().with_target(args.target.clone()))
}

fn entry_path(name: &str) -> Path {
    Path::new(vec![statebus_api::PathElem::new(STATE_ENTRY).with_key("name", name)])
}
