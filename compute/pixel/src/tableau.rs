//! Coefficients of the low-storage Runge-Kutta schemes
//!
//! All multi-stage schemes are expressed in the three-register form
//!
//! ```text
//! s2 += delta[i] * c
//! c = g1[i] * c + g2[i] * s2 + g3[i] * s3 + beta[i] * dt * f(c)
//! ```
//!
//! where `s3` holds the state at the beginning of the step and `s2` starts at
//! zero. After the last stage, the embedded lower-order solution is obtained
//! as a linear combination of the three registers.
//!
//! Coefficients are taken from Ketcheson, "Runge-Kutta methods with minimum
//! storage implementations", J. Comput. Phys. 229 (2010) 1763-1773.

/// Coefficients of one stage
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Stage {
    pub g1: f64,
    pub g2: f64,
    pub g3: f64,
    pub beta: f64,
    pub delta: f64,
}

/// Combination of the registers that yields the lower-order solution
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Embedded {
    pub c_factor: f64,
    pub s2_factor: f64,
    pub s3_factor: f64,
}

/// Shu-Osher RK3(2)3
pub const RK323_STAGES: [Stage; 3] = [
    Stage {
        g1: 1.0,
        g2: 0.0,
        g3: 0.0,
        beta: 1.0,
        delta: 0.0,
    },
    Stage {
        g1: 0.25,
        g2: 0.0,
        g3: 0.75,
        beta: 0.25,
        delta: 0.0,
    },
    Stage {
        g1: 2.0 / 3.0,
        g2: 0.0,
        g3: 1.0 / 3.0,
        beta: 2.0 / 3.0,
        delta: 1.0,
    },
];

/// Heun solution of RK3(2)3, from its second stage
pub const RK323_EMBEDDED: Embedded = Embedded {
    c_factor: 0.0,
    s2_factor: 2.0,
    s3_factor: -1.0,
};

/// 3S* RK4(3)5
pub const RK435_STAGES: [Stage; 5] = [
    Stage {
        g1: 0.0,
        g2: 1.0,
        g3: 0.0,
        beta: 0.075152045700771,
        delta: RK435_DELTA[0],
    },
    Stage {
        g1: -0.497531095840104,
        g2: 1.384996869124138,
        g3: 0.0,
        beta: 0.211361016946069,
        delta: RK435_DELTA[1],
    },
    Stage {
        g1: 1.010070514199942,
        g2: 3.878155713328178,
        g3: 0.0,
        beta: 1.100713347634329,
        delta: RK435_DELTA[2],
    },
    Stage {
        g1: -3.196559004608766,
        g2: -2.324512951813145,
        g3: 1.642598936063715,
        beta: 0.728537814675568,
        delta: RK435_DELTA[3],
    },
    Stage {
        g1: 1.717835630267259,
        g2: -0.514633322274467,
        g3: 0.188295940828347,
        beta: 0.393172889823198,
        delta: RK435_DELTA[4],
    },
];

/// Register weights of RK4(3)5, the last two build the embedded solution
const RK435_DELTA: [f64; 7] = [
    1.0,
    0.081252332929194,
    -1.083849060586449,
    -1.096110881845602,
    2.859440022030827,
    -0.655568367959557,
    -0.194421504490852,
];

/// Third-order solution of RK4(3)5
pub fn rk435_embedded() -> Embedded {
    let delta_sum = 1.0 / RK435_DELTA.iter().sum::<f64>();
    Embedded {
        c_factor: delta_sum * RK435_DELTA[5],
        s2_factor: delta_sum,
        s3_factor: delta_sum * RK435_DELTA[6],
    }
}
