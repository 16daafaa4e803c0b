//! Evaluate one snippet against a JSON value bound as `feat`.
//!
//! Usage: cargo run -p metatag-script --example eval_snippet -- 'feat.properties.count * 2' feature.json

use metatag_script::{Bindings, Sandbox};
use std::env;
use std::fs;
use std::process;

fn main() {
    let mut args = env::args().skip(1);
    let (source, path) = match (args.next(), args.next()) {
        (Some(s), Some(p)) => (s, p),
        _ => {
            eprintln!("Usage: eval_snippet <snippet> <feature.json>");
            eprintln!(
                "  e.g. cargo run -p metatag-script --example eval_snippet -- 'feat.properties.name' shop.json"
            );
            process::exit(1);
        }
    };
    let text = fs::read_to_string(&path).unwrap_or_else(|e| {
        eprintln!("read {}: {}", path, e);
        process::exit(1);
    });
    let feature: serde_json::Value = serde_json::from_str(&text).unwrap_or_else(|e| {
        eprintln!("parse {}: {}", path, e);
        process::exit(1);
    });
    let sandbox = Sandbox::new();
    let snippet = sandbox.compile(&source).unwrap_or_else(|e| {
        eprintln!("{}", e);
        process::exit(1);
    });
    let scope = Bindings::new().bind("feat", feature);
    match sandbox.evaluate(&snippet, &scope) {
        Ok(value) => println!("{}", value.to_json_string()),
        Err(e) => {
            eprintln!("evaluate `{}`: {}", snippet.source(), e);
            process::exit(1);
        }
    }
}
