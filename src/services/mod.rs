pub mod entitlements;
pub mod internal_metrics;
pub mod kpi_persistence;
pub mod kpi_summary;
pub mod opex;
pub mod partner_revenue;
pub mod pipelines;
pub mod scope;
pub mod staging;
