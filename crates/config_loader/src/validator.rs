//! 配置校验模块
//!
//! 校验规则：
//! - sink / notify / topic 名称非空
//! - route 引用的 sink 必须存在
//! - sink 的 `notify` 参数引用的通道必须存在
//! - router threads / queue_capacity > 0
//! - sink queue_capacity > 0
//! - client 至少一个合法的 `host:port` endpoint

use contracts::{ContractError, FabricBlueprint, ParamsExt};

/// 校验 FabricBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &FabricBlueprint) -> Result<(), ContractError> {
    validate_router(blueprint)?;
    validate_sinks(blueprint)?;
    validate_notify(blueprint)?;
    validate_routes(blueprint)?;
    validate_client(blueprint)?;
    Ok(())
}

/// 校验 router 线程池配置
fn validate_router(blueprint: &FabricBlueprint) -> Result<(), ContractError> {
    let router = &blueprint.router;
    if router.threads == 0 {
        return Err(ContractError::config_validation(
            "router.threads",
            "threads must be > 0",
        ));
    }
    if router.queue_capacity == 0 {
        return Err(ContractError::config_validation(
            "router.queue_capacity",
            "queue_capacity must be > 0",
        ));
    }
    Ok(())
}

/// 校验 sink 配置
fn validate_sinks(blueprint: &FabricBlueprint) -> Result<(), ContractError> {
    for (name, sink) in &blueprint.sinks {
        if name.is_empty() {
            return Err(ContractError::config_validation(
                "sinks",
                "sink name cannot be empty",
            ));
        }
        if sink.sink_type.is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks.{name}.type"),
                "sink type cannot be empty",
            ));
        }
        if sink.queue_capacity == 0 {
            return Err(ContractError::config_validation(
                format!("sinks.{name}.queue_capacity"),
                "queue_capacity must be > 0",
            ));
        }
        if let Some(channel) = sink.params.str_param("notify") {
            if !blueprint.notify.contains_key(channel) {
                return Err(ContractError::config_validation(
                    format!("sinks.{name}.notify"),
                    format!("notify channel '{channel}' not found"),
                ));
            }
        }
    }
    Ok(())
}

/// 校验 notify 通道配置
fn validate_notify(blueprint: &FabricBlueprint) -> Result<(), ContractError> {
    for (name, notify) in &blueprint.notify {
        if name.is_empty() {
            return Err(ContractError::config_validation(
                "notify",
                "notify channel name cannot be empty",
            ));
        }
        if notify.notify_type.is_empty() {
            return Err(ContractError::config_validation(
                format!("notify.{name}.type"),
                "notify type cannot be empty",
            ));
        }
    }
    Ok(())
}

/// 校验路由配置 (sink 引用)
fn validate_routes(blueprint: &FabricBlueprint) -> Result<(), ContractError> {
    for (topic, info) in &blueprint.routes {
        if topic.is_empty() {
            return Err(ContractError::config_validation(
                "routes",
                "topic name cannot be empty",
            ));
        }
        for (idx, route) in info.routes.iter().enumerate() {
            if !blueprint.sinks.contains_key(&route.sink) {
                return Err(ContractError::config_validation(
                    format!("routes.{topic}.where[{idx}].sink"),
                    format!("sink '{}' not found", route.sink),
                ));
            }
            if let Some(filter) = &route.filter {
                if filter.filter_type.is_empty() {
                    return Err(ContractError::config_validation(
                        format!("routes.{topic}.where[{idx}].filter.type"),
                        "filter type cannot be empty",
                    ));
                }
            }
        }
    }
    Ok(())
}

/// 校验 client 配置
fn validate_client(blueprint: &FabricBlueprint) -> Result<(), ContractError> {
    let Some(client) = &blueprint.client else {
        return Ok(());
    };

    if client.server_endpoints.is_empty() {
        return Err(ContractError::config_validation(
            "client.server_endpoints",
            "at least one server endpoint is required",
        ));
    }
    for endpoint in &client.server_endpoints {
        let valid = endpoint
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !valid {
            return Err(ContractError::config_validation(
                "client.server_endpoints",
                format!("invalid endpoint '{endpoint}', expected host:port"),
            ));
        }
    }
    if client.async_buffer_capacity == 0 || client.async_batch_size == 0 {
        return Err(ContractError::config_validation(
            "client.async_buffer_capacity / client.async_batch_size",
            "async buffer capacity and batch size must be > 0",
        ));
    }
    if client.retry_count == 0 {
        return Err(ContractError::config_validation(
            "client.retry_count",
            "retry_count must be > 0",
        ));
    }
    Ok(())
}
