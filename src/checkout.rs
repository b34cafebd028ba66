// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/checkout.rs - 结账清单汇总
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

use serde::Serialize;

use crate::{
  catalog::{Catalog, CatalogError, Price},
  model::{DetectItem, DetectResult, Inference},
};

pub const TOTAL_LABEL: &str = "Total Cost:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutRow {
  pub name: String,
  pub price: Price,
}

/// 每个周期重新计算的结账清单: 按名称排序的商品行与总价
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkout {
  currency: String,
  rows: Vec<CheckoutRow>,
  total: Price,
}

impl Checkout {
  pub fn from_detections(catalog: &Catalog, detections: &DetectResult) -> Result<Self, CatalogError> {
    let mut rows = detections
      .iter()
      .map(|item| {
        let entry = catalog.lookup(item.class_id)?;
        Ok(CheckoutRow {
          name: entry.name().to_string(),
          price: entry.price(),
        })
      })
      .collect::<Result<Vec<_>, CatalogError>>()?;
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    let total = rows.iter().map(|row| row.price).sum();

    Ok(Self {
      currency: catalog.currency().to_string(),
      rows,
      total,
    })
  }

  pub fn rows(&self) -> &[CheckoutRow] {
    &self.rows
  }

  pub fn total(&self) -> Price {
    self.total
  }

  pub fn currency(&self) -> &str {
    &self.currency
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  /// 展示用的 (名称, 金额) 行，最后一行为总价
  pub fn table_rows(&self) -> Vec<(String, String)> {
    self
      .rows
      .iter()
      .map(|row| (row.name.clone(), format!("{}{}", self.currency, row.price)))
      .chain(std::iter::once((
        TOTAL_LABEL.to_string(),
        format!("{}{}", self.currency, self.total),
      )))
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelledDetection {
  pub name: String,
  #[serde(flatten)]
  pub item: DetectItem,
}

impl LabelledDetection {
  /// 形如 `Coke 90.0%` 的标签文本
  pub fn label(&self) -> String {
    format!("{} {:.1}%", self.name, self.item.score * 100.0)
  }
}

/// 一次推理的完整展示内容
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
  pub frame_index: u64,
  pub elapsed_ms: u64,
  pub detections: Vec<LabelledDetection>,
  pub checkout: Checkout,
}

impl Report {
  pub fn new(catalog: &Catalog, frame_index: u64, inference: &Inference) -> Result<Self, CatalogError> {
    let checkout = Checkout::from_detections(catalog, &inference.detections)?;
    let detections = inference
      .detections
      .iter()
      .map(|item| {
        Ok(LabelledDetection {
          name: catalog.lookup(item.class_id)?.name().to_string(),
          item: *item,
        })
      })
      .collect::<Result<Vec<_>, CatalogError>>()?;

    Ok(Self {
      frame_index,
      elapsed_ms: inference.elapsed_ms,
      detections,
      checkout,
    })
  }

  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }
}
