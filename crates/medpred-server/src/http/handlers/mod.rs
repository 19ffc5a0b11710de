//! HTTP request handlers.

mod checks;
mod health;
mod medpreds;
mod realtime;
mod reports;
mod uploads;

pub use checks::run_check_zayavka;
pub use health::{health_check, metrics_handler};
pub use medpreds::{
    assign_product, list_medpreds, medpred_products, search_products, unassign_product,
};
pub use realtime::{sse_handler, ws_handler};
pub use reports::{assortment_plan, mp_zayavka_report, transfer_suggestions};
pub use uploads::{upload_application, upload_assortment_plan};
