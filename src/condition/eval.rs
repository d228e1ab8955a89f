//! Check expression evaluation.
//!
//! Evaluation is pure except for the `db-count` escape, which queries the
//! graph-database collaborator and may suspend. Database failures are
//! logged and surface as evaluation errors so that the call site treats
//! the condition as unmet; a DB blip never advances an attack graph.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use tracing::{debug, warn};

use super::{Condition, expr::{CmpOp, Expr}, merge_args};
use crate::alert::Alert;
use crate::error::ConditionError;
use crate::graphdb::GraphDb;
use crate::value::Value;

/// Effective parameters a check expression runs against.
pub type Parameters = BTreeMap<String, Value>;

/// Evaluates compiled conditions against alerts.
#[derive(Clone)]
pub struct Evaluator {
    db: Arc<dyn GraphDb>,
}

impl Evaluator {
    /// Creates an evaluator backed by the given graph-database client.
    #[must_use]
    pub fn new(db: Arc<dyn GraphDb>) -> Self {
        Self { db }
    }

    /// Whether the condition is met for the alert.
    ///
    /// A condition is met iff all declared arguments resolve and the check
    /// expression evaluates to `true`. Unresolvable arguments skip
    /// evaluation entirely; evaluation errors are logged at `debug` and
    /// count as unmet.
    pub async fn is_met(&self, condition: &Condition, alert: &Alert) -> bool {
        let Some(parameters) = merge_args(&condition.params, &condition.args, alert) else {
            debug!(condition = condition.id, "arguments unresolved; condition unmet");
            return false;
        };
        match self.eval(&condition.check, &parameters).await {
            Ok(Value::Bool(b)) => b,
            Ok(other) => {
                debug!(
                    condition = condition.id,
                    result = other.kind(),
                    "check expression did not yield a boolean; condition unmet"
                );
                false
            }
            Err(e) => {
                debug!(condition = condition.id, error = %e, "condition evaluation failed; condition unmet");
                false
            }
        }
    }

    /// Evaluates an expression against resolved parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError::Eval`] on type mismatches, unknown
    /// parameters, or graph-database failures.
    pub async fn eval(&self, expr: &Expr, params: &Parameters) -> Result<Value, ConditionError> {
        match expr {
            Expr::Lit(v) => Ok(v.clone()),
            Expr::Param(name) => params.get(name).cloned().ok_or_else(|| {
                ConditionError::Eval(format!("unknown parameter {name:?}"))
            }),
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Box::pin(self.eval(item, params)).await?);
                }
                Ok(Value::List(out))
            }
            Expr::And(parts) => {
                for part in parts {
                    if !self.eval_bool(part, params).await? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Expr::Or(parts) => {
                for part in parts {
                    if self.eval_bool(part, params).await? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expr::Not(inner) => Ok(Value::Bool(!self.eval_bool(inner, params).await?)),
            Expr::Cmp(op, lhs, rhs) => {
                let a = Box::pin(self.eval(lhs, params)).await?;
                let b = Box::pin(self.eval(rhs, params)).await?;
                Ok(Value::Bool(compare(*op, &a, &b)?))
            }
            Expr::In(needle, haystack) => {
                let needle = Box::pin(self.eval(needle, params)).await?;
                let haystack = Box::pin(self.eval(haystack, params)).await?;
                let items = haystack.as_list().ok_or_else(|| {
                    ConditionError::Eval(format!(
                        "(in …) needs a vector haystack, got {}",
                        haystack.kind()
                    ))
                })?;
                Ok(Value::Bool(items.contains(&needle)))
            }
            Expr::IsNone(inner) => {
                let v = Box::pin(self.eval(inner, params)).await?;
                Ok(Value::Bool(v.is_null()))
            }
            Expr::IsNotNone(inner) => {
                let v = Box::pin(self.eval(inner, params)).await?;
                Ok(Value::Bool(!v.is_null()))
            }
            Expr::StartsWith(s, prefix) => {
                let (s, prefix) = self.eval_str_pair(s, prefix, params, "starts-with").await?;
                Ok(Value::Bool(s.starts_with(&prefix)))
            }
            Expr::EndsWith(s, suffix) => {
                let (s, suffix) = self.eval_str_pair(s, suffix, params, "ends-with").await?;
                Ok(Value::Bool(s.ends_with(&suffix)))
            }
            Expr::Contains(s, sub) => {
                let (s, sub) = self.eval_str_pair(s, sub, params, "contains").await?;
                Ok(Value::Bool(s.contains(&sub)))
            }
            Expr::CidrContains(ip, net) => {
                let (ip, net) = self.eval_str_pair(ip, net, params, "cidr-contains").await?;
                let addr: IpAddr = ip
                    .parse()
                    .map_err(|_| ConditionError::Eval(format!("invalid IP address {ip:?}")))?;
                let net: IpNet = net
                    .parse()
                    .map_err(|_| ConditionError::Eval(format!("invalid CIDR block {net:?}")))?;
                Ok(Value::Bool(net.contains(&addr)))
            }
            Expr::DbCount(query, bindings) => {
                let mut resolved = Vec::with_capacity(bindings.len());
                for binding in bindings {
                    resolved.push(Box::pin(self.eval(binding, params)).await?);
                }
                match self.db.count(query, &resolved).await {
                    #[allow(clippy::cast_precision_loss)]
                    Ok(count) => Ok(Value::Num(count as f64)),
                    Err(e) => {
                        warn!(error = %e, "graph-database escape failed");
                        Err(ConditionError::Eval(e.to_string()))
                    }
                }
            }
        }
    }

    async fn eval_bool(&self, expr: &Expr, params: &Parameters) -> Result<bool, ConditionError> {
        match Box::pin(self.eval(expr, params)).await? {
            Value::Bool(b) => Ok(b),
            other => Err(ConditionError::Eval(format!(
                "expected a boolean operand, got {}",
                other.kind()
            ))),
        }
    }

    async fn eval_str_pair(
        &self,
        a: &Expr,
        b: &Expr,
        params: &Parameters,
        head: &str,
    ) -> Result<(String, String), ConditionError> {
        let a = Box::pin(self.eval(a, params)).await?;
        let b = Box::pin(self.eval(b, params)).await?;
        match (a, b) {
            (Value::Str(a), Value::Str(b)) => Ok((a, b)),
            (a, b) => Err(ConditionError::Eval(format!(
                "({head} …) needs string operands, got {} and {}",
                a.kind(),
                b.kind()
            ))),
        }
    }
}

/// Applies a comparison operator to two values.
fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool, ConditionError> {
    match op {
        CmpOp::Eq => Ok(a == b),
        CmpOp::Ne => Ok(a != b),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ord = a.compare(b).ok_or_else(|| {
                ConditionError::Eval(format!(
                    "cannot order {} against {}",
                    a.kind(),
                    b.kind()
                ))
            })?;
            Ok(match op {
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::Le => ord != Ordering::Greater,
                CmpOp::Gt => ord == Ordering::Greater,
                CmpOp::Ge => ord != Ordering::Less,
                CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
            })
        }
    }
}
