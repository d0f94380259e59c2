pub mod redis_client;
