// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/catalog.rs - 商品目录
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{fmt, iter::Sum, ops::Add, path::Path};

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use tracing::info;

const DEFAULT_CURRENCY: &str = "£";

// 内置目录，下标即模型输出的类别编号
const BUILTIN_ENTRIES: [(&str, u64); 10] = [
  ("Baked Beans", 85),
  ("Coke", 82),
  ("Diet Coke", 79),
  ("Fusilli Pasta", 89),
  ("Lindt Chocolate", 180),
  ("Mars", 80),
  ("Penne Pasta", 89),
  ("Pringles", 85),
  ("Redbull", 120),
  ("Sweetcorn", 69),
];

#[derive(Error, Debug)]
pub enum CatalogError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("目录文件解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("无效的价格: {0}")]
  InvalidPrice(f64),
  #[error("商品名称为空 (第 {0} 项)")]
  EmptyName(usize),
  #[error("目录为空")]
  Empty,
  #[error("未知的类别编号: {0}")]
  UnknownClass(u32),
}

/// 以最小货币单位（便士/分）存储的价格
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Price(u64);

impl Price {
  pub const ZERO: Price = Price(0);

  pub const fn from_minor(minor: u64) -> Self {
    Price(minor)
  }

  pub fn from_major(major: f64) -> Result<Self, CatalogError> {
    if !major.is_finite() || major < 0.0 {
      return Err(CatalogError::InvalidPrice(major));
    }
    Ok(Price((major * 100.0).round() as u64))
  }

  pub fn minor(self) -> u64 {
    self.0
  }
}

impl Add for Price {
  type Output = Price;

  fn add(self, rhs: Price) -> Price {
    Price(self.0.saturating_add(rhs.0))
  }
}

impl Sum for Price {
  fn sum<I: Iterator<Item = Price>>(iter: I) -> Price {
    iter.fold(Price::ZERO, Add::add)
  }
}

impl fmt::Display for Price {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
  }
}

impl Serialize for Price {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
  name: String,
  price: Price,
}

impl CatalogEntry {
  pub fn new(name: impl Into<String>, price: Price) -> Self {
    Self {
      name: name.into(),
      price,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn price(&self) -> Price {
    self.price
  }
}

/// 类别编号到商品名称与单价的映射，构造后不可变
#[derive(Debug, Clone)]
pub struct Catalog {
  currency: String,
  entries: Box<[CatalogEntry]>,
}

#[derive(Deserialize)]
struct CatalogFile {
  #[serde(default)]
  currency: Option<String>,
  entries: Vec<CatalogFileEntry>,
}

#[derive(Deserialize)]
struct CatalogFileEntry {
  name: String,
  price: f64,
}

impl Default for Catalog {
  fn default() -> Self {
    let entries = BUILTIN_ENTRIES
      .iter()
      .map(|&(name, minor)| CatalogEntry::new(name, Price::from_minor(minor)))
      .collect();
    Self {
      currency: DEFAULT_CURRENCY.to_string(),
      entries,
    }
  }
}

impl Catalog {
  pub fn new(currency: impl Into<String>, entries: Vec<CatalogEntry>) -> Result<Self, CatalogError> {
    if entries.is_empty() {
      return Err(CatalogError::Empty);
    }
    if let Some(idx) = entries.iter().position(|entry| entry.name.trim().is_empty()) {
      return Err(CatalogError::EmptyName(idx));
    }
    Ok(Self {
      currency: currency.into(),
      entries: entries.into_boxed_slice(),
    })
  }

  pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
    let file: CatalogFile = serde_json::from_str(json)?;
    let entries = file
      .entries
      .into_iter()
      .map(|entry| Ok(CatalogEntry::new(entry.name, Price::from_major(entry.price)?)))
      .collect::<Result<Vec<_>, CatalogError>>()?;
    Catalog::new(
      file.currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
      entries,
    )
  }

  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
    let path = path.as_ref();
    info!("加载商品目录: {}", path.display());
    let json = std::fs::read_to_string(path)?;
    Self::from_json_str(&json)
  }

  pub fn get(&self, class_id: u32) -> Option<&CatalogEntry> {
    self.entries.get(class_id as usize)
  }

  pub fn lookup(&self, class_id: u32) -> Result<&CatalogEntry, CatalogError> {
    self.get(class_id).ok_or(CatalogError::UnknownClass(class_id))
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn currency(&self) -> &str {
    &self.currency
  }

  pub fn entries(&self) -> &[CatalogEntry] {
    &self.entries
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builtin_catalog_has_ten_entries() {
    let catalog = Catalog::default();
    assert_eq!(catalog.len(), 10);
    assert_eq!(catalog.get(0).unwrap().name(), "Baked Beans");
    assert_eq!(catalog.get(4).unwrap().price(), Price::from_minor(180));
    assert!(catalog.get(10).is_none());
  }

  #[test]
  fn price_formats_with_two_decimals() {
    assert_eq!(Price::from_minor(85).to_string(), "0.85");
    assert_eq!(Price::from_minor(120).to_string(), "1.20");
    assert_eq!(Price::ZERO.to_string(), "0.00");
  }

  #[test]
  fn major_units_round_to_minor() {
    assert_eq!(Price::from_major(0.69).unwrap(), Price::from_minor(69));
    assert!(Price::from_major(-1.0).is_err());
    assert!(Price::from_major(f64::NAN).is_err());
  }

  #[test]
  fn catalog_loads_from_json() {
    let catalog = Catalog::from_json_str(
      r#"{"currency": "€", "entries": [{"name": "Apple", "price": 0.4}, {"name": "Pear", "price": 0.55}]}"#,
    )
    .unwrap();
    assert_eq!(catalog.currency(), "€");
    assert_eq!(catalog.lookup(1).unwrap().price(), Price::from_minor(55));
    assert!(matches!(catalog.lookup(2), Err(CatalogError::UnknownClass(2))));
  }

  #[test]
  fn catalog_rejects_blank_names() {
    let result = Catalog::from_json_str(r#"{"entries": [{"name": " ", "price": 1.0}]}"#);
    assert!(matches!(result, Err(CatalogError::EmptyName(0))));
    let result = Catalog::from_json_str(r#"{"entries": []}"#);
    assert!(matches!(result, Err(CatalogError::Empty)));
  }
}
