// Consistent exit codes for the parkcore CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   10 = server not reachable
//   13 = network error

use std::process;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    ServerDown = 10,
    Network = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(reqwest_err) = cause.downcast_ref::<reqwest::Error>() {
                if reqwest_err.is_connect() {
                    return Self::ServerDown;
                }
                if reqwest_err.is_timeout() {
                    return Self::Network;
                }
            }
            if let Some(redis_err) = cause.downcast_ref::<redis::RedisError>() {
                if redis_err.is_connection_refusal() || redis_err.is_connection_dropped() {
                    return Self::ServerDown;
                }
            }
        }
        Self::Error
    }

    pub fn exit(self) -> ! {
        process::exit(self.code())
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_values() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::Error.code(), 1);
        assert_eq!(ExitCode::Usage.code(), 2);
        assert_eq!(ExitCode::ServerDown.code(), 10);
        assert_eq!(ExitCode::Network.code(), 13);
    }

    #[test]
    fn from_error_generic_is_error() {
        let err = anyhow::anyhow!("something went wrong");
        assert_eq!(ExitCode::from_error(&err), ExitCode::Error);
    }
}
