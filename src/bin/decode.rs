//! Decode a captured discovery response from hex or base64.
//!
//! Usage: cargo run --bin decode <hex_or_base64_string> [source_ip]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use base64::Engine;
use nymphcast::config::DEFAULT_RECEIVER_PORT;
use nymphcast::discovery::{HEADER_LEN, QTYPE_PTR, parse_response};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <hex_or_base64_string> [source_ip]", args[0]);
        std::process::exit(1);
    }

    let data = decode_input(&args[1]);
    let source_ip = match args.get(2) {
        Some(ip) => match ip.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(e) => {
                eprintln!("Invalid source address {ip}: {e}");
                std::process::exit(1);
            }
        },
        None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    };

    println!("Raw bytes ({} bytes): {:02x?}", data.len(), data);
    println!();

    print_header(&data);
    println!();

    match parse_response(&data, SocketAddr::new(source_ip, 5353), QTYPE_PTR, DEFAULT_RECEIVER_PORT) {
        Ok(record) => {
            println!("Server:");
            println!("  name: {}", record.name);
            println!("  ipv4: {}", record.ipv4);
            println!("  ipv6: {}", record.ipv6);
            println!("  port: {}", record.port);
        }
        Err(e) => eprintln!("Rejected: {e}"),
    }
}

fn decode_input(input: &str) -> Vec<u8> {
    // Try hex first (all chars are 0-9, a-f, A-F)
    if input.chars().all(|c| c.is_ascii_hexdigit())
        && input.len().is_multiple_of(2)
        && let Ok(d) = (0..input.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&input[i..i + 2], 16))
            .collect()
    {
        return d;
    }

    if let Ok(d) = base64::engine::general_purpose::STANDARD.decode(input) {
        return d;
    }

    eprintln!("Failed to decode as hex or base64");
    std::process::exit(1);
}

fn print_header(data: &[u8]) {
    if data.len() < HEADER_LEN {
        println!("Header truncated ({} of {HEADER_LEN} bytes)", data.len());
        return;
    }
    let field = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]);
    println!("Header:");
    println!("  id: {}", field(0));
    println!("  flags: 0x{:04x}", field(2));
    println!("  questions: {}", field(4));
    println!("  answers: {}", field(6));
    println!("  authority: {}", field(8));
    println!("  additional: {}", field(10));
}
