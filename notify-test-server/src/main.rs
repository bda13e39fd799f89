//! Stand-in control service for manually exercising the notify client. Decisions are driven
//! by the stream (or application) name in the notification:
//!
//! * `deny...` is rejected with a 403
//! * `rename_<name>` is redirected to the local name `<name>`
//! * `push_<name>` (publish) is redirected to `rtmp://127.0.0.1:1935/live/<name>`
//! * `origins_<name>` (play) answers with a json address list whose first entry is not an
//!   rtmp url, so the failover path gets exercised
//!
//! Everything else is approved.

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Result, Server, StatusCode};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::collections::HashMap;

const ORIGIN_HOST: &str = "127.0.0.1:1935";

#[derive(Serialize)]
struct AddressList {
    state: i32,
    content: AddressContent,
}

#[derive(Serialize)]
struct AddressContent {
    addrs: Vec<Address>,
}

#[derive(Serialize)]
struct Address {
    addr: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Decision {
    Approve,
    Deny,
    Redirect(String),
    Addresses(Vec<String>),
}

#[tokio::main]
async fn main() {
    let addr = "127.0.0.1:9055".parse().unwrap();
    let make_service =
        make_service_fn(|_| async { Ok::<_, hyper::Error>(service_fn(get_response)) });

    let server = Server::bind(&addr).serve(make_service);

    println!("Listening on http://{}", addr);

    if let Err(e) = server.await {
        eprintln!("server error: {}", e);
    }
}

async fn get_response(req: Request<Body>) -> Result<Response<Body>> {
    let method = req.method().clone();
    let fields = if method == Method::GET {
        parse_form(req.uri().query().unwrap_or(""))
    } else if method == Method::POST {
        let whole_body = hyper::body::to_bytes(req.into_body()).await?;
        parse_form(&String::from_utf8_lossy(&whole_body))
    } else {
        return Ok(status_only(StatusCode::METHOD_NOT_ALLOWED));
    };

    let call = fields.get("call").map(|x| x.as_str()).unwrap_or("");
    let decision = decide(&fields);
    println!("Received '{}' notification: {:?} -> {:?}", call, fields, decision);

    let response = match decision {
        Decision::Approve => status_only(StatusCode::OK),
        Decision::Deny => status_only(StatusCode::FORBIDDEN),
        Decision::Redirect(location) => Response::builder()
            .status(StatusCode::FOUND)
            .header("Location", location)
            .body(Body::empty())
            .unwrap(),

        Decision::Addresses(addresses) => {
            let list = AddressList {
                state: 0,
                content: AddressContent {
                    addrs: addresses
                        .into_iter()
                        .map(|addr| Address { addr })
                        .collect(),
                },
            };

            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(serde_json::to_string(&list).unwrap().into())
                .unwrap()
        }
    };

    Ok(response)
}

fn decide(fields: &HashMap<String, String>) -> Decision {
    let call = fields.get("call").map(|x| x.as_str()).unwrap_or("");
    let name = match call {
        "connect" => fields.get("app"),
        _ => fields.get("name"),
    };

    let name = name.map(|x| x.as_str()).unwrap_or("");
    if name.starts_with("deny") {
        return Decision::Deny;
    }

    match call {
        "connect" | "publish" | "play" => (),
        _ => return Decision::Approve,
    }

    if let Some(new_name) = name.strip_prefix("rename_") {
        return Decision::Redirect(new_name.to_string());
    }

    if call == "publish" {
        if let Some(target) = name.strip_prefix("push_") {
            return Decision::Redirect(format!("rtmp://{}/live/{}", ORIGIN_HOST, target));
        }
    }

    if call == "play" {
        if let Some(target) = name.strip_prefix("origins_") {
            return Decision::Addresses(vec![
                format!("http://{}/live/{}", ORIGIN_HOST, target),
                format!("rtmp://{}/live/{}", ORIGIN_HOST, target),
            ]);
        }
    }

    Decision::Approve
}

fn parse_form(content: &str) -> HashMap<String, String> {
    content
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| {
            let value = percent_decode_str(value).decode_utf8_lossy().to_string();
            (key.to_string(), value)
        })
        .collect()
}

fn status_only(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .unwrap()
}
