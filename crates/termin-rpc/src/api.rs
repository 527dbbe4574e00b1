//! The method table: every RPC operation, its parameter type and its engine
//! handler. Parameters are validated during parsing; malformed input never
//! reaches a handler.

use std::sync::Arc;

use jsonrpsee::types::{ErrorObject, ErrorObjectOwned, Params};
use jsonrpsee::RpcModule;
use serde_json::Value;

use termin_core::envelope::Signed;
use termin_core::error::ApiError;
use termin_core::params::{
    AddMediatorPublicKeysData, BookSlotData, CancelBookingData, CancelSlotData, CodesData,
    ConfirmProviderData, GetAppointmentsByZipCodeParams, GetStatsParams, GetTokenParams,
    ListProviderDataData, PublishAppointmentsData, SettingsIdParams, StoreProviderDataData,
    StoreSettingsParams, TimestampedData, UploadDistancesData,
};
use termin_engine::Broker;

fn rpc_err(err: ApiError) -> ErrorObjectOwned {
    ErrorObject::owned(err.code(), err.to_string(), None::<()>)
}

fn parse<T: serde::de::DeserializeOwned>(params: Params<'_>) -> Result<T, ErrorObjectOwned> {
    params
        .parse::<T>()
        .map_err(|e| ErrorObject::owned(400, format!("invalid input: {e}"), None::<()>))
}

fn ack() -> Value {
    Value::String("ok".into())
}

/// Build the full method table over a shared [`Broker`].
pub fn build_module(broker: Arc<Broker>) -> RpcModule<Arc<Broker>> {
    let mut module = RpcModule::new(broker);

    // ── Public endpoints ─────────────────────────────────────────────────────

    module
        .register_method("getKeys", |_params, broker, _| {
            broker.get_keys().map_err(rpc_err)
        })
        .expect("unique method name");

    module
        .register_method("getAppointmentsByZipCode", |params, broker, _| {
            let p: GetAppointmentsByZipCodeParams = parse(params)?;
            broker.get_appointments_by_zip_code(&p).map_err(rpc_err)
        })
        .expect("unique method name");

    module
        .register_method("getToken", |params, broker, _| {
            let p: GetTokenParams = parse(params)?;
            broker.get_token(&p).map_err(rpc_err)
        })
        .expect("unique method name");

    module
        .register_method("getStats", |params, broker, _| {
            let p: GetStatsParams = parse(params)?;
            broker.get_stats(&p).map_err(rpc_err)
        })
        .expect("unique method name");

    // ── Provider endpoints ───────────────────────────────────────────────────

    module
        .register_method("publishAppointments", |params, broker, _| {
            let p: Signed<PublishAppointmentsData> = parse(params)?;
            broker.publish_appointments(&p).map_err(rpc_err)?;
            Ok::<_, ErrorObjectOwned>(ack())
        })
        .expect("unique method name");

    module
        .register_method("getProviderAppointments", |params, broker, _| {
            let p: Signed<TimestampedData> = parse(params)?;
            broker.get_provider_appointments(&p).map_err(rpc_err)
        })
        .expect("unique method name");

    module
        .register_method("getBookedAppointments", |params, broker, _| {
            let p: Signed<TimestampedData> = parse(params)?;
            broker.get_booked_appointments(&p).map_err(rpc_err)
        })
        .expect("unique method name");

    module
        .register_method("cancelBooking", |params, broker, _| {
            let p: Signed<CancelBookingData> = parse(params)?;
            broker.cancel_booking(&p).map_err(rpc_err)?;
            Ok::<_, ErrorObjectOwned>(ack())
        })
        .expect("unique method name");

    module
        .register_method("storeProviderData", |params, broker, _| {
            let p: Signed<StoreProviderDataData> = parse(params)?;
            broker.store_provider_data(&p).map_err(rpc_err)?;
            Ok::<_, ErrorObjectOwned>(ack())
        })
        .expect("unique method name");

    module
        .register_method("getProviderData", |params, broker, _| {
            let p: Signed<TimestampedData> = parse(params)?;
            broker.get_provider_data(&p).map_err(rpc_err)
        })
        .expect("unique method name");

    // ── User endpoints ───────────────────────────────────────────────────────

    module
        .register_method("bookSlot", |params, broker, _| {
            let p: Signed<BookSlotData> = parse(params)?;
            broker.book_slot(&p).map_err(rpc_err)?;
            Ok::<_, ErrorObjectOwned>(ack())
        })
        .expect("unique method name");

    module
        .register_method("cancelSlot", |params, broker, _| {
            let p: Signed<CancelSlotData> = parse(params)?;
            broker.cancel_slot(&p).map_err(rpc_err)?;
            Ok::<_, ErrorObjectOwned>(ack())
        })
        .expect("unique method name");

    // ── Mediator endpoints ───────────────────────────────────────────────────

    module
        .register_method("confirmProvider", |params, broker, _| {
            let p: Signed<ConfirmProviderData> = parse(params)?;
            broker.confirm_provider(&p).map_err(rpc_err)?;
            Ok::<_, ErrorObjectOwned>(ack())
        })
        .expect("unique method name");

    module
        .register_method("getPendingProviderData", |params, broker, _| {
            let p: Signed<ListProviderDataData> = parse(params)?;
            broker.get_pending_provider_data(&p).map_err(rpc_err)
        })
        .expect("unique method name");

    module
        .register_method("getVerifiedProviderData", |params, broker, _| {
            let p: Signed<ListProviderDataData> = parse(params)?;
            broker.get_verified_provider_data(&p).map_err(rpc_err)
        })
        .expect("unique method name");

    // ── Root endpoints ───────────────────────────────────────────────────────

    module
        .register_method("addMediatorPublicKeys", |params, broker, _| {
            let p: Signed<AddMediatorPublicKeysData> = parse(params)?;
            broker.add_mediator_public_keys(&p).map_err(rpc_err)?;
            Ok::<_, ErrorObjectOwned>(ack())
        })
        .expect("unique method name");

    module
        .register_method("addCodes", |params, broker, _| {
            let p: Signed<CodesData> = parse(params)?;
            broker.add_codes(&p).map_err(rpc_err)?;
            Ok::<_, ErrorObjectOwned>(ack())
        })
        .expect("unique method name");

    module
        .register_method("uploadDistances", |params, broker, _| {
            let p: Signed<UploadDistancesData> = parse(params)?;
            broker.upload_distances(&p).map_err(rpc_err)?;
            Ok::<_, ErrorObjectOwned>(ack())
        })
        .expect("unique method name");

    // ── Settings sub-service ─────────────────────────────────────────────────

    module
        .register_method("storeSettings", |params, broker, _| {
            let p: StoreSettingsParams = parse(params)?;
            broker.store_settings(&p).map_err(rpc_err)?;
            Ok::<_, ErrorObjectOwned>(ack())
        })
        .expect("unique method name");

    module
        .register_method("getSettings", |params, broker, _| {
            let p: SettingsIdParams = parse(params)?;
            broker.get_settings(&p).map_err(rpc_err)
        })
        .expect("unique method name");

    module
        .register_method("deleteSettings", |params, broker, _| {
            let p: SettingsIdParams = parse(params)?;
            broker.delete_settings(&p).map_err(rpc_err)?;
            Ok::<_, ErrorObjectOwned>(ack())
        })
        .expect("unique method name");

    module
}
