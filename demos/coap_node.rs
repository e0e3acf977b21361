//! LWM2M device node CLI
//!
//! Usage:
//!   cargo run --example coap_node -- [--port 5683] [--endpoint demo-device] [--verbose]
//!
//! Serves a small device tree (Device object 3, Temperature object 3303)
//! over UDP CoAP: GET/PUT/POST/DELETE, observation with write-attributes,
//! and notifications pushed back to observers.

use clap::Parser;
use coap_lite::{
    CoapOption, CoapRequest, ContentFormat as CoapContentFormat, MessageClass, MessageType,
    ObserveOption, Packet, RequestType, ResponseType,
};
use rust_lwm2m::coap_types::{ContentFormat, Method, Observe, Request};
use rust_lwm2m::dispatcher::Dispatcher;
use rust_lwm2m::timer::{TimerKind, TimerQueue};
use rust_lwm2m::ResourceValue;
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[command(name = "lwm2m-node")]
#[command(about = "LWM2M device node - serve a device tree over CoAP")]
struct Args {
    /// UDP port to listen on
    #[arg(short, long, default_value = "5683")]
    port: u16,

    /// Endpoint name
    #[arg(short, long, default_value = "demo-device")]
    endpoint: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();

    let mut dispatcher = Dispatcher::new();
    let mut timers = TimerQueue::new();
    build_device_tree(&mut dispatcher);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        println!("\n\nReceived Ctrl+C, shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    let bind_addr = format!("0.0.0.0:{}", args.port);
    let socket = UdpSocket::bind(&bind_addr)?;
    socket.set_read_timeout(Some(std::time::Duration::from_millis(500)))?;

    println!("────────────────────────────────────────────────────────────────");
    println!("Endpoint:        {}", args.endpoint);
    println!("Listening on:    coap://0.0.0.0:{}", args.port);
    println!("Registered tree: {}", dispatcher.tree().registration_links());
    println!("────────────────────────────────────────────────────────────────");
    println!("\nQuick test:");
    println!("  coap-client -m get coap://127.0.0.1:{}/3/0/1", args.port);
    println!("  coap-client -m get -s 30 coap://127.0.0.1:{}/3303/0/5700", args.port);
    println!("\nWaiting for requests... (Ctrl+C to stop)\n");

    // observation tokens mapped back to their observer's address
    let mut observers: HashMap<Vec<u8>, SocketAddr> = HashMap::new();
    let mut buf = [0u8; 1500];

    while running.load(Ordering::SeqCst) {
        let now = now_secs();
        for event in timers.poll(now) {
            if let (TimerKind::PminElapsed | TimerKind::PmaxElapsed, Some(path)) =
                (event.kind, event.path)
            {
                dispatcher.handle_report_timer(event.kind, &path, &mut timers, now);
            }
        }
        flush_notifications(&mut dispatcher, &observers, &socket, args.verbose)?;

        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                continue; // check running flag
            }
            Err(e) => return Err(e),
        };

        let Ok(packet) = Packet::from_bytes(&buf[..len]) else {
            continue;
        };
        // RST also carries an empty code, so check the type first
        if packet.header.get_type() == MessageType::Reset {
            dispatcher.handle_notification_reset(packet.header.message_id, &mut timers);
            continue;
        }
        if matches!(packet.header.code, MessageClass::Empty) {
            // empty ACK for a confirmable notification
            dispatcher.handle_notification_ack(packet.header.message_id);
            continue;
        }

        let coap_request = CoapRequest::from_packet(packet, src);
        let Some(request) = to_core_request(&coap_request) else {
            let response = error_packet(&coap_request.message, ResponseType::MethodNotAllowed);
            socket.send_to(&response.to_bytes().unwrap_or_default(), src)?;
            continue;
        };

        if args.verbose {
            println!(
                "[{}] {} /{} ({} bytes)",
                src,
                request.method,
                request.path,
                request.payload.len()
            );
        }

        if request.observe == Some(Observe::Register) {
            observers.insert(request.token.clone(), src);
        } else if request.observe == Some(Observe::Deregister) {
            observers.remove(&request.token);
        }

        let response = dispatcher.handle_request(&request, &mut timers, now);
        let packet = to_coap_response(&coap_request.message, &response);
        socket.send_to(&packet.to_bytes().unwrap_or_default(), src)?;

        if args.verbose {
            println!(
                "  → {:?} ({} bytes)\n",
                packet.header.code,
                packet.payload.len()
            );
        } else {
            print!(".");
            use std::io::Write;
            std::io::stdout().flush().ok();
        }

        flush_notifications(&mut dispatcher, &observers, &socket, args.verbose)?;
    }

    Ok(())
}

/// Device object 3 (manufacturer, model, battery) and a temperature
/// sensor object 3303
fn build_device_tree(dispatcher: &mut Dispatcher) {
    let tree = dispatcher.tree_mut();

    let device = tree.create_object(3).expect("fresh tree");
    let instance = device.create_instance(0).expect("fresh object");
    instance
        .create_resource(0, ResourceValue::String("rust-lwm2m".into()))
        .expect("fresh instance");
    instance
        .create_resource(1, ResourceValue::String("demo-node".into()))
        .expect("fresh instance");
    instance
        .create_resource(9, ResourceValue::Integer(100))
        .expect("fresh instance");

    let sensor = tree.create_object(3303).expect("fresh tree");
    let instance = sensor.create_instance(0).expect("fresh object");
    instance
        .create_resource(5700, ResourceValue::Float(21.5))
        .expect("fresh instance");
}

/// Send queued notifications to the observers that registered their tokens
fn flush_notifications(
    dispatcher: &mut Dispatcher,
    observers: &HashMap<Vec<u8>, SocketAddr>,
    socket: &UdpSocket,
    verbose: bool,
) -> std::io::Result<()> {
    for message in dispatcher.take_outbox() {
        let Some(&addr) = observers.get(&message.token) else {
            continue;
        };
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Confirmable);
        packet.header.code = MessageClass::Response(ResponseType::Content);
        packet.header.message_id = message.message_id;
        packet.set_token(message.token.clone());
        if let Some(sequence) = message.observe {
            packet.set_observe_value(sequence);
        }
        if let Some(format) = message.content_format.and_then(to_coap_format) {
            packet.set_content_format(format);
        }
        packet.payload = message.payload;
        socket.send_to(&packet.to_bytes().unwrap_or_default(), addr)?;
        if verbose {
            println!("  ⇒ notify [{}] /{} seq {:?}", addr, message.path, message.observe);
        }
    }
    Ok(())
}

fn to_core_request(coap_request: &CoapRequest<SocketAddr>) -> Option<Request> {
    let packet = &coap_request.message;
    let method = match packet.header.code {
        MessageClass::Request(RequestType::Get) => Method::Get,
        MessageClass::Request(RequestType::Put) => Method::Put,
        MessageClass::Request(RequestType::Post) => Method::Post,
        MessageClass::Request(RequestType::Delete) => Method::Delete,
        _ => return None,
    };

    let mut request = Request::new(method, &coap_request.get_path())
        .with_token(packet.get_token())
        .with_message_id(packet.header.message_id);
    if !packet.payload.is_empty() {
        let format = packet
            .get_content_format()
            .and_then(from_coap_format)
            .unwrap_or(ContentFormat::TextPlain);
        request = request.with_payload(packet.payload.clone(), format);
    }
    if let Some(query) = packet.get_option(CoapOption::UriQuery) {
        let joined = query
            .iter()
            .map(|q| String::from_utf8_lossy(q).into_owned())
            .collect::<Vec<_>>()
            .join("&");
        if !joined.is_empty() {
            request = request.with_query(&joined);
        }
    }
    match packet.get_observe_value() {
        Some(Ok(v)) if v == ObserveOption::Register as u32 => {
            request = request.with_observe(Observe::Register);
        }
        Some(Ok(v)) if v == ObserveOption::Deregister as u32 => {
            request = request.with_observe(Observe::Deregister);
        }
        _ => {}
    }
    Some(request)
}

fn to_coap_response(request: &Packet, response: &rust_lwm2m::coap_types::Response) -> Packet {
    let mut packet = Packet::new();
    packet.header.message_id = request.header.message_id;
    packet.set_token(request.get_token().to_vec());

    let (class, detail) = response.code.to_code_pair();
    packet.header.code = match (class, detail) {
        (2, 1) => MessageClass::Response(ResponseType::Created),
        (2, 2) => MessageClass::Response(ResponseType::Deleted),
        (2, 4) => MessageClass::Response(ResponseType::Changed),
        (2, 5) => MessageClass::Response(ResponseType::Content),
        (4, 0) => MessageClass::Response(ResponseType::BadRequest),
        (4, 4) => MessageClass::Response(ResponseType::NotFound),
        (4, 5) => MessageClass::Response(ResponseType::MethodNotAllowed),
        (4, 6) => MessageClass::Response(ResponseType::NotAcceptable),
        (4, 13) => MessageClass::Response(ResponseType::RequestEntityTooLarge),
        (4, 15) => MessageClass::Response(ResponseType::UnsupportedContentFormat),
        _ => MessageClass::Response(ResponseType::InternalServerError),
    };

    if let Some(sequence) = response.observe {
        packet.set_observe_value(sequence);
    }
    if let Some(location) = &response.location_path {
        for segment in location.split('/').filter(|s| !s.is_empty()) {
            packet.add_option(CoapOption::LocationPath, segment.as_bytes().to_vec());
        }
    }
    if !response.payload.is_empty() {
        packet.payload = response.payload.clone();
        if let Some(format) = response.content_format.and_then(to_coap_format) {
            packet.set_content_format(format);
        }
    }
    packet
}

fn from_coap_format(format: CoapContentFormat) -> Option<ContentFormat> {
    match format {
        CoapContentFormat::TextPlain => Some(ContentFormat::TextPlain),
        CoapContentFormat::ApplicationJSON => Some(ContentFormat::Json),
        CoapContentFormat::ApplicationCBOR => Some(ContentFormat::Cbor),
        CoapContentFormat::ApplicationLinkFormat => Some(ContentFormat::LinkFormat),
        CoapContentFormat::ApplicationOctetStream => Some(ContentFormat::Opaque),
        _ => None,
    }
}

fn to_coap_format(format: ContentFormat) -> Option<CoapContentFormat> {
    match format {
        ContentFormat::TextPlain => Some(CoapContentFormat::TextPlain),
        ContentFormat::Json => Some(CoapContentFormat::ApplicationJSON),
        ContentFormat::Cbor => Some(CoapContentFormat::ApplicationCBOR),
        ContentFormat::LinkFormat => Some(CoapContentFormat::ApplicationLinkFormat),
        ContentFormat::Opaque => Some(CoapContentFormat::ApplicationOctetStream),
        ContentFormat::Tlv => None,
    }
}

fn error_packet(request: &Packet, code: ResponseType) -> Packet {
    let mut packet = Packet::new();
    packet.header.message_id = request.header.message_id;
    packet.header.code = MessageClass::Response(code);
    packet.set_token(request.get_token().to_vec());
    packet
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
