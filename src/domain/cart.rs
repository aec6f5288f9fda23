use crate::domain::ProductId;
use crate::error::{OrderError, Result};
use std::collections::BTreeMap;

/// An explicit cart value handed to the converter.
///
/// Lines are kept in product order so reservations always happen in the same
/// sequence regardless of how the client built the cart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cart {
    lines: BTreeMap<ProductId, u32>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a cart from `(product, quantity)` pairs, merging repeats.
    pub fn from_lines(lines: impl IntoIterator<Item = (ProductId, u32)>) -> Result<Self> {
        let mut cart = Cart::new();
        for (product_id, quantity) in lines {
            cart.add(product_id, quantity)?;
        }
        Ok(cart)
    }

    /// Adds `quantity` of `product_id`, merging with an existing line. A
    /// merged quantity that no longer fits is rejected and the line is left
    /// as it was.
    pub fn add(&mut self, product_id: ProductId, quantity: u32) -> Result<&mut Self> {
        let line = self.lines.entry(product_id).or_insert(0);
        *line = line
            .checked_add(quantity)
            .ok_or_else(|| OrderError::InvalidQuantity {
                product_id,
                quantity: i64::from(*line) + i64::from(quantity),
            })?;
        Ok(self)
    }

    pub fn lines(&self) -> impl Iterator<Item = (ProductId, u32)> + '_ {
        self.lines.iter().map(|(p, q)| (*p, *q))
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Rejects empty carts and zero quantities before anything is touched.
    pub fn validate(&self) -> Result<()> {
        if self.lines.is_empty() {
            return Err(OrderError::EmptyCart);
        }
        if let Some((product_id, quantity)) = self.lines.iter().find(|(_, q)| **q == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: *product_id,
                quantity: i64::from(*quantity),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_merges_lines() {
        let cart = Cart::from_lines([(2, 1), (1, 3), (2, 4)]).unwrap();
        let lines: Vec<_> = cart.lines().collect();
        assert_eq!(lines, vec![(1, 3), (2, 5)]);
    }

    #[test]
    fn test_empty_cart_rejected() {
        assert!(matches!(Cart::new().validate(), Err(OrderError::EmptyCart)));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let cart = Cart::from_lines([(4, 0)]).unwrap();
        assert!(matches!(
            cart.validate(),
            Err(OrderError::InvalidQuantity {
                product_id: 4,
                quantity: 0
            })
        ));
    }

    #[test]
    fn test_merged_quantity_overflow_rejected() {
        let result = Cart::from_lines([(1, u32::MAX), (1, 1)]);
        assert!(matches!(
            result,
            Err(OrderError::InvalidQuantity {
                product_id: 1,
                quantity: 4_294_967_296
            })
        ));

        let mut cart = Cart::from_lines([(1, u32::MAX)]).unwrap();
        assert!(cart.add(1, 1).is_err());
        assert_eq!(cart.lines().collect::<Vec<_>>(), vec![(1, u32::MAX)]);
    }
}
