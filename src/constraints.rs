use std::collections::BTreeMap;

use log::debug;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use crate::{
    assembly::TripletAccumulator,
    error::{FeaError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free(usize),
    Fixed(usize),
}

/// Free and fixed DOF sets of one analysis run, both ascending
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintPartition {
    pub free: Vec<usize>,
    pub fixed: Vec<usize>,
    /// Value of each fixed DOF, aligned with `fixed`
    pub prescribed: Vec<f64>,
    pub total_dofs: usize,
    slots: Vec<Slot>,
}

impl ConstraintPartition {
    /// Builds the partition from (DOF, value) pairs in application order.
    /// When a DOF is prescribed more than once the last value wins.
    pub fn from_prescribed(
        pairs: &[(usize, f64)],
        total_dofs: usize,
    ) -> Result<ConstraintPartition> {
        let mut values: BTreeMap<usize, f64> = BTreeMap::new();
        for (dof, value) in pairs {
            if *dof >= total_dofs {
                return Err(FeaError::Input(format!(
                    "Prescribed DOF {dof} is outside the {total_dofs} DOF system"
                )));
            }
            if let Some(previous) = values.insert(*dof, *value) {
                if previous != *value {
                    debug!("DOF {dof} prescribed again: {previous} replaced by {value}");
                }
            }
        }

        let mut free = Vec::with_capacity(total_dofs - values.len());
        let mut fixed = Vec::with_capacity(values.len());
        let mut prescribed = Vec::with_capacity(values.len());
        let mut slots = Vec::with_capacity(total_dofs);
        for dof in 0..total_dofs {
            match values.get(&dof) {
                Some(value) => {
                    slots.push(Slot::Fixed(fixed.len()));
                    fixed.push(dof);
                    prescribed.push(*value);
                }
                None => {
                    slots.push(Slot::Free(free.len()));
                    free.push(dof);
                }
            }
        }

        Ok(ConstraintPartition {
            free,
            fixed,
            prescribed,
            total_dofs,
            slots,
        })
    }

    pub fn num_free(&self) -> usize {
        self.free.len()
    }

    /// Eliminates the fixed DOFs: `K_ff u_f = F_f - K_fc u_c`
    pub fn reduce(
        &self,
        stiffness: &CsrMatrix<f64>,
        load: &DVector<f64>,
    ) -> Result<(CsrMatrix<f64>, DVector<f64>)> {
        if stiffness.nrows() != self.total_dofs
            || stiffness.ncols() != self.total_dofs
            || load.len() != self.total_dofs
        {
            return Err(FeaError::Input(format!(
                "System of size {}x{} with load of length {} does not match {} DOFs",
                stiffness.nrows(),
                stiffness.ncols(),
                load.len(),
                self.total_dofs
            )));
        }

        let mut rhs = DVector::from_iterator(self.free.len(), self.free.iter().map(|d| load[*d]));
        let mut triplets = TripletAccumulator::with_capacity(stiffness.nnz());
        for (row, col, value) in stiffness.triplet_iter() {
            let Slot::Free(r) = self.slots[row] else {
                continue;
            };
            match self.slots[col] {
                Slot::Free(c) => triplets.push(r, c, *value),
                Slot::Fixed(c) => rhs[r] -= value * self.prescribed[c],
            }
        }

        Ok((triplets.to_csr(self.free.len())?, rhs))
    }

    /// Scatters the free solution and the prescribed values back into a
    /// vector over all DOFs
    pub fn expand(&self, free_solution: &DVector<f64>) -> Result<DVector<f64>> {
        if free_solution.len() != self.free.len() {
            return Err(FeaError::Input(format!(
                "Free solution has {} entries, expected {}",
                free_solution.len(),
                self.free.len()
            )));
        }
        let full = DVector::from_iterator(
            self.total_dofs,
            self.slots.iter().map(|slot| match slot {
                Slot::Free(i) => free_solution[*i],
                Slot::Fixed(i) => self.prescribed[*i],
            }),
        );
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn tridiagonal(n: usize) -> CsrMatrix<f64> {
        let mut acc = TripletAccumulator::new();
        for i in 0..n {
            acc.push(i, i, 2.0);
            if i + 1 < n {
                acc.push(i, i + 1, -1.0);
                acc.push(i + 1, i, -1.0);
            }
        }
        acc.to_csr(n).unwrap()
    }

    #[test]
    fn last_prescribed_value_wins() {
        let p = ConstraintPartition::from_prescribed(&[(3, 1.0), (0, 0.0), (3, 2.5)], 5).unwrap();
        assert_eq!(p.free, vec![1, 2, 4]);
        assert_eq!(p.fixed, vec![0, 3]);
        assert_eq!(p.prescribed, vec![0.0, 2.5]);
    }

    #[test]
    fn out_of_range_dof_is_rejected() {
        assert!(ConstraintPartition::from_prescribed(&[(5, 0.0)], 5).is_err());
    }

    #[test]
    fn reduction_moves_prescribed_values_to_the_rhs() {
        let k = tridiagonal(4);
        let f = DVector::from_vec(vec![0.0, 1.0, 0.0, 0.0]);
        let p = ConstraintPartition::from_prescribed(&[(0, 0.0), (3, 2.0)], 4).unwrap();
        let (kff, ff) = p.reduce(&k, &f).unwrap();

        let expected = DMatrix::from_row_slice(2, 2, &[2.0, -1.0, -1.0, 2.0]);
        assert_eq!(DMatrix::from(&kff), expected);
        // row 2 couples to fixed dof 3 with -1: 0 - (-1 * 2)
        assert_eq!(ff, DVector::from_vec(vec![1.0, 2.0]));
    }

    #[test]
    fn expand_restores_order() {
        let p = ConstraintPartition::from_prescribed(&[(1, 0.5)], 3).unwrap();
        let full = p.expand(&DVector::from_vec(vec![7.0, 9.0])).unwrap();
        assert_eq!(full, DVector::from_vec(vec![7.0, 0.5, 9.0]));
        assert!(p.expand(&DVector::from_vec(vec![1.0])).is_err());
    }

    #[test]
    fn reduce_then_expand_satisfies_free_equations() {
        let k = tridiagonal(5);
        let f = DVector::from_vec(vec![0.0, 1.0, -2.0, 0.5, 0.0]);
        let p = ConstraintPartition::from_prescribed(&[(0, 1.0), (4, -1.0)], 5).unwrap();
        let (kff, ff) = p.reduce(&k, &f).unwrap();
        let uf = DMatrix::from(&kff).lu().solve(&ff).unwrap();
        let u = p.expand(&uf).unwrap();
        let residual = DMatrix::from(&k) * &u - &f;
        for dof in &p.free {
            assert_relative_eq!(residual[*dof], 0.0, epsilon = 1e-12);
        }
        assert_eq!(u[0], 1.0);
        assert_eq!(u[4], -1.0);
    }
}
