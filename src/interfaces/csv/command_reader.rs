use crate::domain::cart::Cart;
use crate::domain::payment::{CallbackOutcome, ProviderVariant};
use crate::domain::{OrderId, ProductId, UserId};
use crate::error::{OrderError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Op {
    Product,
    Threshold,
    Checkout,
    Pay,
    Callback,
    Cancel,
    Ship,
    Deliver,
    Restock,
    Adjust,
    Sweep,
}

/// One script row as it sits in the file. Which columns matter depends on `op`.
#[derive(Debug, Deserialize)]
struct CommandRecord {
    op: Op,
    user: Option<UserId>,
    order: Option<OrderId>,
    product: Option<ProductId>,
    qty: Option<i64>,
    price: Option<Decimal>,
    items: Option<String>,
    provider: Option<ProviderVariant>,
    outcome: Option<String>,
    reason: Option<String>,
}

/// What a scripted provider callback should look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedCallback {
    Outcome(CallbackOutcome),
    /// Signed with the wrong secret.
    Forged,
}

/// A validated script command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Product {
        product_id: ProductId,
        price: Decimal,
        stock: u32,
    },
    Threshold {
        product_id: ProductId,
        threshold: u32,
    },
    Checkout {
        user_id: UserId,
        cart: Cart,
    },
    Pay {
        order_id: OrderId,
        provider: ProviderVariant,
    },
    Callback {
        order_id: OrderId,
        provider: Option<ProviderVariant>,
        callback: ScriptedCallback,
    },
    /// `user_id` of `None` is an admin cancellation.
    Cancel {
        order_id: OrderId,
        user_id: Option<UserId>,
    },
    Ship {
        order_id: OrderId,
    },
    Deliver {
        order_id: OrderId,
    },
    Restock {
        product_id: ProductId,
        quantity: u32,
        reason: String,
    },
    Adjust {
        product_id: ProductId,
        delta: i64,
        reason: String,
    },
    Sweep,
}

impl TryFrom<CommandRecord> for Command {
    type Error = OrderError;

    fn try_from(record: CommandRecord) -> Result<Self> {
        let command = match record.op {
            Op::Product => Command::Product {
                product_id: required(record.product, "product")?,
                price: required(record.price, "price")?,
                stock: quantity(record.qty.unwrap_or(0))?,
            },
            Op::Threshold => Command::Threshold {
                product_id: required(record.product, "product")?,
                threshold: quantity(required(record.qty, "qty")?)?,
            },
            Op::Checkout => Command::Checkout {
                user_id: required(record.user, "user")?,
                cart: parse_items(&required(record.items, "items")?)?,
            },
            Op::Pay => Command::Pay {
                order_id: required(record.order, "order")?,
                provider: required(record.provider, "provider")?,
            },
            Op::Callback => Command::Callback {
                order_id: required(record.order, "order")?,
                provider: record.provider,
                callback: parse_outcome(record.outcome.as_deref().unwrap_or("confirmed"))?,
            },
            Op::Cancel => Command::Cancel {
                order_id: required(record.order, "order")?,
                user_id: record.user,
            },
            Op::Ship => Command::Ship {
                order_id: required(record.order, "order")?,
            },
            Op::Deliver => Command::Deliver {
                order_id: required(record.order, "order")?,
            },
            Op::Restock => Command::Restock {
                product_id: required(record.product, "product")?,
                quantity: quantity(required(record.qty, "qty")?)?,
                reason: record.reason.unwrap_or_else(|| "restock".to_string()),
            },
            Op::Adjust => Command::Adjust {
                product_id: required(record.product, "product")?,
                delta: required(record.qty, "qty")?,
                reason: record.reason.unwrap_or_else(|| "adjustment".to_string()),
            },
            Op::Sweep => Command::Sweep,
        };
        Ok(command)
    }
}

fn required<T>(value: Option<T>, column: &str) -> Result<T> {
    value.ok_or_else(|| OrderError::InvalidCommand(format!("missing {column}")))
}

fn quantity(value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| OrderError::InvalidCommand(format!("quantity {value} out of range")))
}

/// `items` is `product:qty` pairs joined by `;`.
fn parse_items(items: &str) -> Result<Cart> {
    let mut cart = Cart::new();
    for pair in items.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (product, qty) = pair
            .split_once(':')
            .ok_or_else(|| OrderError::InvalidCommand(format!("bad item '{pair}'")))?;
        let product = product
            .trim()
            .parse()
            .map_err(|_| OrderError::InvalidCommand(format!("bad product in '{pair}'")))?;
        let qty = qty
            .trim()
            .parse()
            .map_err(|_| OrderError::InvalidCommand(format!("bad quantity in '{pair}'")))?;
        cart.add(product, qty)?;
    }
    Ok(cart)
}

fn parse_outcome(outcome: &str) -> Result<ScriptedCallback> {
    match outcome {
        "confirmed" => Ok(ScriptedCallback::Outcome(CallbackOutcome::Confirmed)),
        "cancelled" => Ok(ScriptedCallback::Outcome(CallbackOutcome::Cancelled)),
        "malformed" => Ok(ScriptedCallback::Outcome(CallbackOutcome::Malformed)),
        "forged" => Ok(ScriptedCallback::Forged),
        other => Err(OrderError::InvalidCommand(format!("unknown outcome '{other}'"))),
    }
}

/// Reads script commands from a CSV source.
///
/// Fields are trimmed and rows may omit trailing columns.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and validates commands, one per row.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader
            .into_deserialize::<CommandRecord>()
            .map(|record| Command::try_from(record?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const HEADER: &str = "op,user,order,product,qty,price,items,provider,outcome,reason";

    fn read(rows: &str) -> Vec<Result<Command>> {
        let data = format!("{HEADER}\n{rows}");
        CommandReader::new(data.as_bytes()).commands().collect()
    }

    #[test]
    fn test_reader_valid_stream() {
        let results = read(
            "product,,,1,10,12.50,,,,\n\
             checkout, 7, , , , , 1:2;2:1, , ,\n\
             pay,,1,,,,,qr_code,,\n\
             callback,,1,,,,,,cancelled,\n\
             cancel,,1,,,,,,,\n\
             adjust,,,1,-2,,,,,damaged\n\
             sweep",
        );
        assert_eq!(results.len(), 7);
        assert_eq!(
            results[0].as_ref().unwrap(),
            &Command::Product {
                product_id: 1,
                price: dec!(12.50),
                stock: 10
            }
        );
        let Command::Checkout { user_id, cart } = results[1].as_ref().unwrap() else {
            panic!("expected checkout");
        };
        assert_eq!(*user_id, 7);
        assert_eq!(cart.lines().collect::<Vec<_>>(), vec![(1, 2), (2, 1)]);
        assert!(matches!(
            results[2].as_ref().unwrap(),
            Command::Pay {
                order_id: 1,
                provider: ProviderVariant::QrCode
            }
        ));
        assert!(matches!(
            results[3].as_ref().unwrap(),
            Command::Callback {
                callback: ScriptedCallback::Outcome(CallbackOutcome::Cancelled),
                ..
            }
        ));
        assert!(matches!(
            results[4].as_ref().unwrap(),
            Command::Cancel { user_id: None, .. }
        ));
        assert!(matches!(
            results[5].as_ref().unwrap(),
            Command::Adjust { delta: -2, .. }
        ));
        assert_eq!(results[6].as_ref().unwrap(), &Command::Sweep);
    }

    #[test]
    fn test_reader_malformed_lines() {
        let results = read(
            "refund,1,1,,,,,,,\n\
             pay,,1,,,,,cash,,\n\
             checkout,1,,,,,1-2,,,\n\
             restock,,,1,-5,,,,,",
        );
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.is_err()));
        assert!(matches!(results[2], Err(OrderError::InvalidCommand(_))));
    }

    #[test]
    fn test_reader_rejects_overflowing_items() {
        let results = read("checkout,1,,,,,1:4294967295;1:1,,,");
        assert!(matches!(
            results[0],
            Err(OrderError::InvalidQuantity { product_id: 1, .. })
        ));
    }
}
