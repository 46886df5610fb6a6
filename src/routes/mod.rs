pub(crate) mod cluster;
pub(crate) mod health;
pub(crate) mod jobs;
pub(crate) mod logs;
pub(crate) mod runtime;
pub(crate) mod stocks;
