//! End-to-end tests over the public client API
//!
//! Each test builds a small device tree, drives the client with decoded
//! CoAP requests and synthetic server responses, and checks the outbox
//! the transport would send.

use rust_lwm2m::coap_types::{
    ContentFormat, Method, Observe, OutboundKind, Request, ResponseCode,
};
use rust_lwm2m::registration::REBOOTSTRAP_BACKOFF;
use rust_lwm2m::storage::CredentialKey;
use rust_lwm2m::{
    ClientEvent, CredentialStore, EndpointDescriptor, Lwm2mClient, MemoryStore, NodePath,
    ResourceValue,
};

/// Client with registration credentials and a device tree holding
/// 3/0/1 = "v1" and 4/0 (empty connectivity instance)
fn device_client() -> Lwm2mClient {
    let store = MemoryStore::provisioned("coaps://server:5684", b"psk-key");
    let mut client = Lwm2mClient::new(EndpointDescriptor::new("device-1", 3600), Box::new(store));

    let tree = client.tree_mut();
    let device = tree.create_object(3).unwrap();
    let instance = device.create_instance(0).unwrap();
    instance
        .create_resource(1, ResourceValue::String("v1".into()))
        .unwrap();
    tree.create_object(4).unwrap().create_instance(0).unwrap();
    client
}

fn register(client: &mut Lwm2mClient, now: u64) {
    client.start(now).unwrap();
    let register = client.take_outbox().remove(0);
    assert_eq!(register.kind, OutboundKind::Register);
    client.handle_server_response(
        register.message_id,
        ResponseCode::Created,
        &[],
        Some("rd/device-1".into()),
        None,
        now,
    );
    assert_eq!(client.take_events(), vec![ClientEvent::Registered]);
}

#[test]
fn test_write_then_read_back() {
    let mut client = device_client();

    let put = Request::new(Method::Put, "3/0/1")
        .with_payload(b"v2".to_vec(), ContentFormat::TextPlain);
    let response = client.handle_request(&put, 0);
    assert_eq!(response.code, ResponseCode::Changed);

    let get = Request::new(Method::Get, "3/0/1");
    let response = client.handle_request(&get, 1);
    assert_eq!(response.code, ResponseCode::Content);
    assert_eq!(response.payload, b"v2".to_vec());
    assert_eq!(response.content_format, Some(ContentFormat::TextPlain));
}

#[test]
fn test_observe_sequence_numbers() {
    let mut client = device_client();

    let observe = Request::new(Method::Get, "3/0/1")
        .with_observe(Observe::Register)
        .with_token(&[0x42]);
    let response = client.handle_request(&observe, 0);
    assert_eq!(response.code, ResponseCode::Content);
    assert_eq!(response.observe, Some(0));
    assert_eq!(response.payload, b"v1".to_vec());

    let put = Request::new(Method::Put, "3/0/1")
        .with_payload(b"v2".to_vec(), ContentFormat::TextPlain);
    client.handle_request(&put, 1);

    let outbox = client.take_outbox();
    assert_eq!(outbox.len(), 1);
    let notification = &outbox[0];
    assert_eq!(notification.kind, OutboundKind::Notification);
    assert_eq!(notification.observe, Some(1));
    assert_eq!(notification.token, vec![0x42]);
    assert_eq!(notification.payload, b"v2".to_vec());
}

#[test]
fn test_unchanged_write_sends_no_notification() {
    let mut client = device_client();
    let observe = Request::new(Method::Get, "3/0/1")
        .with_observe(Observe::Register)
        .with_token(&[0x42]);
    client.handle_request(&observe, 0);

    let put = Request::new(Method::Put, "3/0/1")
        .with_payload(b"v1".to_vec(), ContentFormat::TextPlain);
    let response = client.handle_request(&put, 1);
    assert_eq!(response.code, ResponseCode::Changed);
    assert!(client.take_outbox().is_empty());
}

#[test]
fn test_create_resource_under_instance() {
    let mut client = device_client();

    let post = Request::new(Method::Post, "4/0").with_payload(
        br#"{"5": "coaps://fw.example/pkg"}"#.to_vec(),
        ContentFormat::Json,
    );
    let response = client.handle_request(&post, 0);
    assert_eq!(response.code, ResponseCode::Created);
    assert_eq!(response.location_path.as_deref(), Some("4/0/5"));

    let get = Request::new(Method::Get, "4/0/5");
    let response = client.handle_request(&get, 1);
    assert_eq!(response.payload, b"coaps://fw.example/pkg".to_vec());
}

#[test]
fn test_corrupt_create_leaves_no_orphan() {
    let mut client = device_client();

    // id 6 carries an unusable value; id 5 must not survive the failure
    let post = Request::new(Method::Post, "4/0").with_payload(
        br#"{"5": "coaps://fw.example/pkg", "6": null}"#.to_vec(),
        ContentFormat::Json,
    );
    let response = client.handle_request(&post, 0);
    assert_eq!(response.code, ResponseCode::BadRequest);

    let get = Request::new(Method::Get, "4/0/5");
    let response = client.handle_request(&get, 1);
    assert_eq!(response.code, ResponseCode::NotFound);
}

#[test]
fn test_create_object_instance() {
    let mut client = device_client();

    let post = Request::new(Method::Post, "4").with_payload(
        br#"{"1": {"0": "cellular", "1": 42}}"#.to_vec(),
        ContentFormat::Json,
    );
    let response = client.handle_request(&post, 0);
    assert_eq!(response.code, ResponseCode::Created);
    assert_eq!(response.location_path.as_deref(), Some("4/1"));

    let get = Request::new(Method::Get, "4/1/1");
    let response = client.handle_request(&get, 1);
    assert_eq!(response.payload, b"42".to_vec());
}

#[test]
fn test_delete_instance_tears_down_observations() {
    let mut client = device_client();
    let observe = Request::new(Method::Get, "3/0/1")
        .with_observe(Observe::Register)
        .with_token(&[0x42]);
    client.handle_request(&observe, 0);

    let delete = Request::new(Method::Delete, "3/0");
    let response = client.handle_request(&delete, 1);
    assert_eq!(response.code, ResponseCode::Deleted);

    let get = Request::new(Method::Get, "3/0/1");
    assert_eq!(client.handle_request(&get, 2).code, ResponseCode::NotFound);
    // no stale notification timer survives the subtree
    assert_eq!(client.next_deadline(), None);
}

#[test]
fn test_lifetime_negotiation_schedules_update() {
    // Max-Age above the optimum threshold: interval = lifetime - margin
    let mut client = device_client();
    client.start(0).unwrap();
    let register = client.take_outbox().remove(0);
    client.handle_server_response(
        register.message_id,
        ResponseCode::Created,
        &[],
        Some("rd/device-1".into()),
        Some(86400),
        0,
    );
    assert_eq!(client.next_deadline(), Some(86400 - 900));

    // short requested lifetime: interval = lifetime * reduction factor
    let store = MemoryStore::provisioned("coaps://server:5684", b"psk-key");
    let mut client = Lwm2mClient::new(EndpointDescriptor::new("device-1", 30), Box::new(store));
    client.start(0).unwrap();
    let register = client.take_outbox().remove(0);
    client.handle_server_response(
        register.message_id,
        ResponseCode::Created,
        &[],
        None,
        None,
        0,
    );
    assert_eq!(client.next_deadline(), Some(22));
}

#[test]
fn test_rebootstrap_after_security_failure_waits_for_backoff() {
    let mut client = device_client();
    register(&mut client, 0);

    client.rebootstrap(10);
    let outbox = client.take_outbox();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].kind, OutboundKind::Bootstrap);

    // handshake-level rejection: re-bootstrap is deferred, not immediate
    client.handle_server_response(
        outbox[0].message_id,
        ResponseCode::BadRequest,
        &[],
        None,
        None,
        10,
    );
    assert!(client.take_outbox().is_empty());
    assert_eq!(client.next_deadline(), Some(10 + REBOOTSTRAP_BACKOFF));

    client.tick(10 + REBOOTSTRAP_BACKOFF - 1);
    assert!(client.take_outbox().is_empty());

    client.tick(10 + REBOOTSTRAP_BACKOFF);
    let outbox = client.take_outbox();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].kind, OutboundKind::Bootstrap);
}

#[test]
fn test_bootstrap_provisions_registration() {
    let mut store = MemoryStore::new();
    store
        .set(CredentialKey::BootstrapUri, b"coaps://bootstrap:5684")
        .unwrap();
    let mut client = Lwm2mClient::new(EndpointDescriptor::new("device-1", 3600), Box::new(store));
    client.start(0).unwrap();

    let outbox = client.take_outbox();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].kind, OutboundKind::Bootstrap);

    client.handle_server_response(
        outbox[0].message_id,
        ResponseCode::Changed,
        br#"{"server_uri": "coaps://server:5684", "device_key": "psk"}"#,
        None,
        None,
        2,
    );
    assert_eq!(client.take_events(), vec![ClientEvent::BootstrapDone]);

    let outbox = client.take_outbox();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].kind, OutboundKind::Register);
}

#[test]
fn test_threshold_attributes_gate_notifications() {
    let store = MemoryStore::provisioned("coaps://server:5684", b"psk-key");
    let mut client = Lwm2mClient::new(EndpointDescriptor::new("device-1", 3600), Box::new(store));
    client
        .tree_mut()
        .create_object(3303)
        .unwrap()
        .create_instance(0)
        .unwrap()
        .create_resource(5700, ResourceValue::Float(20.0))
        .unwrap();
    let path = NodePath::resource(3303, 0, 5700);

    let attrs = Request::new(Method::Put, "3303/0/5700").with_query("gt=25");
    assert_eq!(client.handle_request(&attrs, 0).code, ResponseCode::Changed);
    let observe = Request::new(Method::Get, "3303/0/5700")
        .with_observe(Observe::Register)
        .with_token(&[0x01]);
    client.handle_request(&observe, 0);

    // below the band edge: suppressed
    client
        .set_value(&path, ResourceValue::Float(24.0), 5)
        .unwrap();
    assert!(client.take_outbox().is_empty());

    // crosses gt: notified
    client
        .set_value(&path, ResourceValue::Float(26.5), 6)
        .unwrap();
    let outbox = client.take_outbox();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].payload, b"26.5".to_vec());
}

#[test]
fn test_pmin_defers_notification() {
    let mut client = device_client();
    let attrs = Request::new(Method::Put, "3/0/1").with_query("pmin=10");
    assert_eq!(client.handle_request(&attrs, 0).code, ResponseCode::Changed);
    let observe = Request::new(Method::Get, "3/0/1")
        .with_observe(Observe::Register)
        .with_token(&[0x01]);
    client.handle_request(&observe, 0);

    let put = Request::new(Method::Put, "3/0/1")
        .with_payload(b"v2".to_vec(), ContentFormat::TextPlain);
    client.handle_request(&put, 3);
    // inside the pmin window: held back
    assert!(client.take_outbox().is_empty());

    client.tick(9);
    assert!(client.take_outbox().is_empty());

    client.tick(10);
    let outbox = client.take_outbox();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].payload, b"v2".to_vec());
}

#[test]
fn test_cancel_observation_stops_notifications() {
    let mut client = device_client();
    let observe = Request::new(Method::Get, "3/0/1")
        .with_observe(Observe::Register)
        .with_token(&[0x42]);
    client.handle_request(&observe, 0);

    let cancel = Request::new(Method::Get, "3/0/1").with_observe(Observe::Deregister);
    let response = client.handle_request(&cancel, 1);
    assert_eq!(response.code, ResponseCode::Content);
    assert_eq!(response.observe, None);

    let put = Request::new(Method::Put, "3/0/1")
        .with_payload(b"v2".to_vec(), ContentFormat::TextPlain);
    client.handle_request(&put, 2);
    assert!(client.take_outbox().is_empty());
}

#[test]
fn test_get_instance_as_cbor() {
    let mut client = device_client();

    let mut get = Request::new(Method::Get, "3/0");
    get.accept = Some(ContentFormat::Cbor);
    let response = client.handle_request(&get, 0);
    assert_eq!(response.code, ResponseCode::Content);
    assert_eq!(response.content_format, Some(ContentFormat::Cbor));
    println!("CBOR hex: {}", hex::encode(&response.payload));

    let decoded: serde_json::Value = ciborium::from_reader(response.payload.as_slice()).unwrap();
    assert_eq!(decoded["1"], "v1");
}

#[test]
fn test_registration_payload_lists_tree_links() {
    let mut client = device_client();
    client.start(0).unwrap();
    let register = client.take_outbox().remove(0);
    let links = String::from_utf8(register.payload).unwrap();
    assert_eq!(links, "</3/0>,</4/0>");
}
