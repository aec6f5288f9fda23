#![allow(dead_code)]

use std::fs::File;
use std::io::{Error, Write};
use std::path::Path;
use tempfile::NamedTempFile;

pub const HEADER: [&str; 10] = [
    "op", "user", "order", "product", "qty", "price", "items", "provider", "outcome", "reason",
];

/// Writes a script with the standard header followed by `rows`.
pub fn script(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", HEADER.join(",")).unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    file.flush().unwrap();
    file
}

/// One product with `stock` units, then `orders` single-unit checkouts, each
/// paid by QR code and confirmed.
pub fn generate_script(path: &Path, stock: u32, orders: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(HEADER)?;
    wtr.write_record(["product", "", "", "1", &stock.to_string(), "2.50", "", "", "", ""])?;

    for i in 1..=orders {
        let order = i.to_string();
        let user = (i % 50 + 1).to_string();
        wtr.write_record(["checkout", &user, "", "", "", "", "1:1", "", "", ""])?;
        wtr.write_record(["pay", "", &order, "", "", "", "", "qr_code", "", ""])?;
        wtr.write_record(["callback", "", &order, "", "", "", "", "", "confirmed", ""])?;
    }

    wtr.flush()?;
    Ok(())
}
