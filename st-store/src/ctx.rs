/// Request-scoped marker passed into every Bmc call, following the same
/// calling convention for DB- and in-memory-backed stores alike. Carries
/// nothing today; kept as a seam for auth/tracing context later.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ctx;

impl Ctx {
    pub fn root() -> Self {
        Ctx
    }
}
