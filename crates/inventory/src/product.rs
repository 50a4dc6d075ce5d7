use serde::{Deserialize, Serialize};

use wayfare_core::{Entity, ProductId, StockShortage, UserId, Versioned};

/// Product lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Archived,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Archived => "archived",
        }
    }
}

impl core::str::FromStr for ProductStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProductStatus::Active),
            "archived" => Ok(ProductStatus::Archived),
            other => Err(format!("unknown product status '{other}'")),
        }
    }
}

/// Purchasable unit-counted inventory.
///
/// Invariant: stock never goes negative (enforced by type and by
/// [`StockableProduct::reserve_stock`]). Descriptive fields are owned by
/// catalog management; this core mutates only the stock counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockableProduct {
    id: ProductId,
    seller: UserId,
    stock: u32,
    status: ProductStatus,
    /// Price per unit in minor currency units (cents).
    unit_price: u64,
    version: u64,
}

impl StockableProduct {
    pub fn new(id: ProductId, seller: UserId, stock: u32, unit_price: u64) -> Self {
        Self {
            id,
            seller,
            stock,
            status: ProductStatus::Active,
            unit_price,
            version: 0,
        }
    }

    /// Reconstruct a row loaded from storage.
    pub fn from_parts(
        id: ProductId,
        seller: UserId,
        stock: u32,
        status: ProductStatus,
        unit_price: u64,
        version: u64,
    ) -> Self {
        Self {
            id,
            seller,
            stock,
            status,
            unit_price,
            version,
        }
    }

    pub fn seller(&self) -> UserId {
        self.seller
    }

    pub fn archived(mut self) -> Self {
        self.status = ProductStatus::Archived;
        self
    }

    pub fn stock(&self) -> u32 {
        self.stock
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == ProductStatus::Active
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    /// Reserve `quantity` units. Pure: returns the next row state.
    ///
    /// An archived product reports zero availability rather than a separate
    /// error, so a mixed cart surfaces every unsellable line in one
    /// rejection.
    pub fn reserve_stock(&self, quantity: u32) -> Result<Self, StockShortage> {
        let available = if self.is_active() { self.stock } else { 0 };
        if quantity == 0 || quantity > available {
            return Err(StockShortage {
                product_id: self.id,
                requested: quantity,
                available,
            });
        }

        let mut next = self.clone();
        next.stock -= quantity;
        Ok(next)
    }

    /// Return `quantity` units to stock (refund/cancel path). Pure.
    pub fn restock(&self, quantity: u32) -> Self {
        let mut next = self.clone();
        next.stock = next.stock.saturating_add(quantity);
        next
    }
}

impl Entity for StockableProduct {
    type Id = ProductId;

    fn id(&self) -> &ProductId {
        &self.id
    }
}

impl Versioned for StockableProduct {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
