//! 内存中的物品库存, 作为被限流保护的业务接口的数据来源

use dashmap::DashMap;
use serde::Serialize;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Item {
    pub id: u64,
    pub name: String,
    pub quantity: u32,
    pub checked_out: u32,
}

impl Item {
    pub fn available(&self) -> u32 {
        self.quantity.saturating_sub(self.checked_out)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CheckoutError {
    NotFound(u64),
    Unavailable(u64),
}

impl fmt::Display for CheckoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckoutError::NotFound(id) => write!(f, "item {} not found", id),
            CheckoutError::Unavailable(id) => write!(f, "item {} is not available", id),
        }
    }
}

#[derive(Default)]
pub struct Inventory {
    items: DashMap<u64, Item>,
}

impl Inventory {
    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let ret = Self::default();
        for it in items {
            ret.items.insert(it.id, it);
        }
        ret
    }

    pub fn get(&self, id: u64) -> Option<Item> {
        self.items.get(&id).map(|i| i.value().clone())
    }

    /// 借出一件, 库存不足时失败
    pub fn checkout(&self, id: u64) -> Result<Item, CheckoutError> {
        let mut item = self.items.get_mut(&id).ok_or(CheckoutError::NotFound(id))?;
        if item.available() == 0 {
            return Err(CheckoutError::Unavailable(id));
        }
        item.checked_out += 1;
        Ok(item.clone())
    }
}
