//! 配置校验模块
//!
//! 校验规则：
//! - destination 名称非空且唯一
//! - flush 阈值 >= 1
//! - putter 的 flush_count <= 500 (服务端单次调用上限)
//! - sink_type 对应的配置段存在
//! - commit_pool: worker 数 / 超时 >= 1, table 非空, columns 与 fields 等长
//! - commit_pool: flush_count * columns 不超过单条 INSERT 的参数上限
//! - intake 引用的 destination 存在

use std::collections::HashSet;

use contracts::{
    CommitPoolConfig, ContractError, DestinationConfig, PipelineConfig, SinkType, MAX_INSERT_PARAMS,
    MAX_PUT_BATCH,
};

/// 校验 PipelineConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &PipelineConfig) -> Result<(), ContractError> {
    validate_destination_names(config)?;
    for (idx, dest) in config.destinations.iter().enumerate() {
        validate_thresholds(idx, dest)?;
        validate_sink_section(idx, dest)?;
    }
    validate_intake(config)?;
    Ok(())
}

/// 校验 destination 名称唯一性
fn validate_destination_names(config: &PipelineConfig) -> Result<(), ContractError> {
    if config.destinations.is_empty() {
        return Err(ContractError::config_validation(
            "destinations",
            "at least one destination is required",
        ));
    }

    let mut seen = HashSet::new();
    for (idx, dest) in config.destinations.iter().enumerate() {
        if dest.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("destinations[{}].name", idx),
                "destination name cannot be empty",
            ));
        }
        if !seen.insert(&dest.name) {
            return Err(ContractError::config_validation(
                format!("destinations[name={}]", dest.name),
                "duplicate destination name",
            ));
        }
    }
    Ok(())
}

/// 校验 flush 阈值
fn validate_thresholds(idx: usize, dest: &DestinationConfig) -> Result<(), ContractError> {
    if dest.flush_count == 0 {
        return Err(ContractError::config_validation(
            format!("destinations[{}].flush_count", idx),
            "flush_count must be >= 1",
        ));
    }
    if dest.flush_size_bytes == 0 {
        return Err(ContractError::config_validation(
            format!("destinations[{}].flush_size_bytes", idx),
            "flush_size_bytes must be >= 1",
        ));
    }
    if dest.flush_interval_ms == 0 {
        return Err(ContractError::config_validation(
            format!("destinations[{}].flush_interval_ms", idx),
            "flush_interval_ms must be >= 1",
        ));
    }
    if dest.sink_type == SinkType::Putter && dest.flush_count > MAX_PUT_BATCH {
        return Err(ContractError::config_validation(
            format!("destinations[{}].flush_count", idx),
            format!(
                "flush_count cannot exceed {} records, got {}",
                MAX_PUT_BATCH, dest.flush_count
            ),
        ));
    }
    Ok(())
}

/// 校验 sink 类型特定配置
fn validate_sink_section(idx: usize, dest: &DestinationConfig) -> Result<(), ContractError> {
    match dest.sink_type {
        SinkType::Putter => {
            let putter = dest.putter.as_ref().ok_or_else(|| {
                ContractError::config_validation(
                    format!("destinations[{}].putter", idx),
                    "sink_type 'putter' requires a [putter] section",
                )
            })?;
            if putter.stream.is_empty() {
                return Err(ContractError::config_validation(
                    format!("destinations[{}].putter.stream", idx),
                    "unspecified stream name",
                ));
            }
            Ok(())
        }
        SinkType::CommitPool => {
            let pool = dest.commit_pool.as_ref().ok_or_else(|| {
                ContractError::config_validation(
                    format!("destinations[{}].commit_pool", idx),
                    "sink_type 'commit_pool' requires a [commit_pool] section",
                )
            })?;
            validate_commit_pool(idx, dest.flush_count, pool)
        }
        SinkType::Log => Ok(()),
    }
}

fn validate_commit_pool(
    idx: usize,
    flush_count: usize,
    pool: &CommitPoolConfig,
) -> Result<(), ContractError> {
    let field = |name: &str| format!("destinations[{}].commit_pool.{}", idx, name);

    if pool.worker_pool_size == 0 {
        return Err(ContractError::config_validation(
            field("worker_pool_size"),
            "worker_pool_size must be >= 1",
        ));
    }
    if pool.operation_timeout_ms == 0 {
        return Err(ContractError::config_validation(
            field("operation_timeout_ms"),
            "operation_timeout_ms must be >= 1",
        ));
    }
    if pool.table.is_empty() {
        return Err(ContractError::config_validation(
            field("table"),
            "table name cannot be empty",
        ));
    }
    if pool.columns.is_empty() {
        return Err(ContractError::config_validation(
            field("columns"),
            "requires at least 1 column",
        ));
    }
    if pool.columns.len() != pool.fields.len() {
        return Err(ContractError::config_validation(
            field("fields"),
            format!(
                "{} fields cannot feed {} columns",
                pool.fields.len(),
                pool.columns.len()
            ),
        ));
    }
    let params = flush_count.saturating_mul(pool.columns.len());
    if params > MAX_INSERT_PARAMS {
        return Err(ContractError::config_validation(
            format!("destinations[{}].flush_count", idx),
            format!(
                "{} rows of {} columns need {} bind parameters, limit is {}",
                flush_count,
                pool.columns.len(),
                params,
                MAX_INSERT_PARAMS
            ),
        ));
    }
    Ok(())
}

/// 校验 intake 引用
fn validate_intake(config: &PipelineConfig) -> Result<(), ContractError> {
    let intake = &config.intake;

    if intake.channel_capacity == 0 {
        return Err(ContractError::config_validation(
            "intake.channel_capacity",
            "channel_capacity must be >= 1",
        ));
    }

    if let Some(ref name) = intake.default_destination {
        if config.destination(name).is_none() {
            return Err(ContractError::config_validation(
                "intake.default_destination",
                format!("default_destination '{}' not found in destinations", name),
            ));
        }
    }

    if let Some(ref name) = intake.template_destination {
        match config.destination(name) {
            None => {
                return Err(ContractError::config_validation(
                    "intake.template_destination",
                    format!("template_destination '{}' not found in destinations", name),
                ))
            }
            Some(dest) if dest.sink_type != SinkType::Putter => {
                return Err(ContractError::config_validation(
                    "intake.template_destination",
                    format!("template_destination '{}' must be a putter", name),
                ))
            }
            Some(_) => {}
        }
    }

    Ok(())
}
