//! Tunables of the push core. Defaults can be overridden from the
//! environment at construction; the timing knobs and the stop switch are
//! atomics so operators can move them on a live server and every scheduling
//! decision re-reads current state.

use std::{
    env,
    fmt::Debug,
    str::FromStr,
    sync::atomic::{
        AtomicBool,
        AtomicU32,
        AtomicU64,
        Ordering,
    },
    time::Duration,
};

pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let var_s = match env::var(name) {
        Ok(s) => s,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(..)) => {
            tracing::warn!("Invalid value for {name}, falling back to {default:?}.");
            return default;
        },
    };
    match T::from_str(&var_s) {
        Ok(v) => {
            tracing::info!("Overriding {name} to {v:?} from environment");
            v
        },
        Err(e) => {
            tracing::warn!("Invalid value {var_s} for {name}, falling back to {default:?}: {e:?}");
            default
        },
    }
}

pub struct SessionServerConfig {
    /// Dispatcher parallelism: number of keyed workers.
    push_task_executor_pool_size: usize,
    /// Bound of each keyed worker's queue.
    push_task_executor_queue_size: usize,

    push_data_task_debouncing_millis: AtomicU64,
    push_data_task_retry_first_delay_millis: AtomicU64,
    push_data_task_retry_increment_delay_millis: AtomicU64,
    push_task_retry_times: AtomicU32,
    client_node_exchange_timeout_millis: AtomicU64,
    stop_push_switch: AtomicBool,
}

impl SessionServerConfig {
    pub fn from_env() -> Self {
        Self {
            push_task_executor_pool_size: env_config("PUSH_TASK_EXECUTOR_POOL_SIZE", 8),
            push_task_executor_queue_size: env_config("PUSH_TASK_EXECUTOR_QUEUE_SIZE", 1000),
            push_data_task_debouncing_millis: AtomicU64::new(env_config(
                "PUSH_DATA_TASK_DEBOUNCING_MILLIS",
                500,
            )),
            push_data_task_retry_first_delay_millis: AtomicU64::new(env_config(
                "PUSH_DATA_TASK_RETRY_FIRST_DELAY_MILLIS",
                500,
            )),
            push_data_task_retry_increment_delay_millis: AtomicU64::new(env_config(
                "PUSH_DATA_TASK_RETRY_INCREMENT_DELAY_MILLIS",
                500,
            )),
            push_task_retry_times: AtomicU32::new(env_config("PUSH_TASK_RETRY_TIMES", 3)),
            client_node_exchange_timeout_millis: AtomicU64::new(env_config(
                "CLIENT_NODE_EXCHANGE_TIMEOUT_MILLIS",
                3000,
            )),
            stop_push_switch: AtomicBool::new(env_config("STOP_PUSH_SWITCH", false)),
        }
    }

    pub fn push_task_executor_pool_size(&self) -> usize {
        self.push_task_executor_pool_size
    }

    pub fn push_task_executor_queue_size(&self) -> usize {
        self.push_task_executor_queue_size
    }

    pub fn push_data_task_debouncing(&self) -> Duration {
        Duration::from_millis(self.push_data_task_debouncing_millis.load(Ordering::SeqCst))
    }

    pub fn push_data_task_retry_first_delay(&self) -> Duration {
        Duration::from_millis(
            self.push_data_task_retry_first_delay_millis
                .load(Ordering::SeqCst),
        )
    }

    pub fn push_data_task_retry_increment_delay(&self) -> Duration {
        Duration::from_millis(
            self.push_data_task_retry_increment_delay_millis
                .load(Ordering::SeqCst),
        )
    }

    pub fn push_task_retry_times(&self) -> u32 {
        self.push_task_retry_times.load(Ordering::SeqCst)
    }

    pub fn client_node_exchange_timeout(&self) -> Duration {
        Duration::from_millis(
            self.client_node_exchange_timeout_millis
                .load(Ordering::SeqCst),
        )
    }

    pub fn is_stop_push(&self) -> bool {
        self.stop_push_switch.load(Ordering::SeqCst)
    }

    pub fn set_stop_push(&self, stop: bool) {
        self.stop_push_switch.store(stop, Ordering::SeqCst);
    }

    pub fn set_push_data_task_debouncing_millis(&self, millis: u64) {
        self.push_data_task_debouncing_millis
            .store(millis, Ordering::SeqCst);
    }

    pub fn set_push_data_task_retry_first_delay_millis(&self, millis: u64) {
        self.push_data_task_retry_first_delay_millis
            .store(millis, Ordering::SeqCst);
    }

    pub fn set_push_data_task_retry_increment_delay_millis(&self, millis: u64) {
        self.push_data_task_retry_increment_delay_millis
            .store(millis, Ordering::SeqCst);
    }

    pub fn set_push_task_retry_times(&self, times: u32) {
        self.push_task_retry_times.store(times, Ordering::SeqCst);
    }

    pub fn set_client_node_exchange_timeout_millis(&self, millis: u64) {
        self.client_node_exchange_timeout_millis
            .store(millis, Ordering::SeqCst);
    }
}

impl Default for SessionServerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
