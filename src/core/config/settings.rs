use super::parsing::{
    env_optional, env_or_default, is_valid_store_name, parse_bool, parse_cors_origins,
    parse_drain_policy, parse_environment, parse_partition_mode, parse_u16, parse_u64,
};
use super::types::{
    ApiSettings, ConfigError, CorsSettings, DatabaseSettings, DrainSettings, QueueSettings,
    RedisSettings, ResultSettings, RuntimeSettings, ServerHost, ServerPort, ServerSettings,
    Settings, TelemetrySettings,
};

/// Longest claim a receive may take out on a message: seven days.
const MAX_VISIBILITY_TIMEOUT_SECONDS: u64 = 7 * 24 * 60 * 60;

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("EXAM_HOST", "0.0.0.0");
        let port = env_or_default("EXAM_PORT", "8000");

        let environment =
            parse_environment(env_optional("EXAM_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("EXAM_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Exam Ingest API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "exam_ingest");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "exam_ingest");
        let database_url = env_optional("DATABASE_URL");

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let queue_name = env_or_default("EXAM_QUEUE_NAME", "exams");
        let dead_letter_name = env_or_default("EXAM_DEAD_LETTER_QUEUE", "exams-poison");
        let visibility_timeout_seconds = parse_u64(
            "EXAM_QUEUE_VISIBILITY_TIMEOUT_SECONDS",
            env_or_default("EXAM_QUEUE_VISIBILITY_TIMEOUT_SECONDS", "30"),
        )?;
        let auto_create =
            env_optional("EXAM_QUEUE_AUTO_CREATE").map(|value| parse_bool(&value)).unwrap_or(true);

        let results_table = env_or_default("EXAM_RESULTS_TABLE", "exams");
        let partition_mode = parse_partition_mode(env_or_default("EXAM_PARTITION_MODE", "fixed"))?;
        let fixed_partition_key = env_or_default("EXAM_PARTITION_KEY", "studentId");

        let drain_policy = parse_drain_policy(env_or_default("EXAM_DRAIN_POLICY", "halt"))?;
        let drain_interval_seconds = parse_u64(
            "EXAM_DRAIN_INTERVAL_SECONDS",
            env_or_default("EXAM_DRAIN_INTERVAL_SECONDS", "60"),
        )?;
        let drain_lock_ttl_seconds = parse_u64(
            "EXAM_DRAIN_LOCK_TTL_SECONDS",
            env_or_default("EXAM_DRAIN_LOCK_TTL_SECONDS", "300"),
        )?;

        let log_level = env_or_default("EXAM_LOG_LEVEL", "info");
        let json = env_optional("EXAM_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            queue: QueueSettings {
                name: queue_name,
                dead_letter_name,
                visibility_timeout_seconds,
                auto_create,
            },
            results: ResultSettings { table: results_table, partition_mode, fixed_partition_key },
            drain: DrainSettings {
                policy: drain_policy,
                interval_seconds: drain_interval_seconds,
                lock_ttl_seconds: drain_lock_ttl_seconds,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn queue(&self) -> &QueueSettings {
        &self.queue
    }

    pub(crate) fn results(&self) -> &ResultSettings {
        &self.results
    }

    pub(crate) fn drain(&self) -> &DrainSettings {
        &self.drain
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("EXAM_QUEUE_NAME", &self.queue.name),
            ("EXAM_DEAD_LETTER_QUEUE", &self.queue.dead_letter_name),
            ("EXAM_RESULTS_TABLE", &self.results.table),
        ] {
            if !is_valid_store_name(value) {
                return Err(ConfigError::InvalidValue { field, value: value.clone() });
            }
        }

        if self.queue.name == self.queue.dead_letter_name {
            return Err(ConfigError::InvalidValue {
                field: "EXAM_DEAD_LETTER_QUEUE",
                value: self.queue.dead_letter_name.clone(),
            });
        }

        let visibility = self.queue.visibility_timeout_seconds;
        if visibility == 0 || visibility > MAX_VISIBILITY_TIMEOUT_SECONDS {
            return Err(ConfigError::InvalidValue {
                field: "EXAM_QUEUE_VISIBILITY_TIMEOUT_SECONDS",
                value: visibility.to_string(),
            });
        }

        if self.results.fixed_partition_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "EXAM_PARTITION_KEY",
                value: String::from("<empty>"),
            });
        }

        if self.drain.interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "EXAM_DRAIN_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.drain.lock_ttl_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "EXAM_DRAIN_LOCK_TTL_SECONDS",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.redis.password.is_empty() {
            return Err(ConfigError::MissingSecret("REDIS_PASSWORD"));
        }

        Ok(())
    }
}
