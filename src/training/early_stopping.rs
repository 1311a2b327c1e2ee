use crate::Result;
use candle_core::{Tensor, Var};

/// Stops a phase once validation loss has not improved for `patience`
/// epochs, keeping a copy of the best weights to restore.
pub struct EarlyStopping {
    patience: usize,
    best_loss: f32,
    best_epoch: Option<usize>,
    wait: usize,
    best_weights: Option<Vec<(Var, Tensor)>>,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_loss: f32::INFINITY,
            best_epoch: None,
            wait: 0,
            best_weights: None,
        }
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn best_loss(&self) -> f32 {
        self.best_loss
    }

    /// Record an epoch; returns true when training should stop.
    /// `vars` is snapshotted whenever the loss improves.
    pub fn on_epoch_end(&mut self, epoch: usize, val_loss: f32, vars: &[Var]) -> Result<bool> {
        if val_loss < self.best_loss {
            self.best_loss = val_loss;
            self.best_epoch = Some(epoch);
            self.wait = 0;

            let mut snapshot = Vec::with_capacity(vars.len());
            for var in vars {
                snapshot.push((var.clone(), var.as_tensor().copy()?));
            }
            self.best_weights = Some(snapshot);
            return Ok(false);
        }

        self.wait += 1;
        Ok(self.wait >= self.patience)
    }

    /// Put the best snapshot back; returns the restored epoch if any
    pub fn restore_best_weights(&self) -> Result<Option<usize>> {
        let Some(snapshot) = &self.best_weights else {
            return Ok(None);
        };
        for (var, tensor) in snapshot {
            var.set(tensor)?;
        }
        Ok(self.best_epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn scalar(var: &Var) -> f32 {
        var.as_tensor().to_vec1::<f32>().unwrap()[0]
    }

    #[test]
    fn test_stops_after_patience_without_improvement() {
        let var = Var::new(&[1f32], &Device::Cpu).unwrap();
        let vars = [var.clone()];
        let mut stopping = EarlyStopping::new(3);

        assert!(!stopping.on_epoch_end(0, 0.9, &vars).unwrap());
        assert!(!stopping.on_epoch_end(1, 0.5, &vars).unwrap());
        assert!(!stopping.on_epoch_end(2, 0.6, &vars).unwrap());
        assert!(!stopping.on_epoch_end(3, 0.7, &vars).unwrap());
        assert!(stopping.on_epoch_end(4, 0.55, &vars).unwrap());
        assert_eq!(stopping.best_epoch(), Some(1));
    }

    #[test]
    fn test_improvement_resets_patience() {
        let var = Var::new(&[1f32], &Device::Cpu).unwrap();
        let vars = [var];
        let mut stopping = EarlyStopping::new(2);

        assert!(!stopping.on_epoch_end(0, 1.0, &vars).unwrap());
        assert!(!stopping.on_epoch_end(1, 1.1, &vars).unwrap());
        assert!(!stopping.on_epoch_end(2, 0.8, &vars).unwrap());
        assert!(!stopping.on_epoch_end(3, 0.9, &vars).unwrap());
        assert!(stopping.on_epoch_end(4, 0.9, &vars).unwrap());
    }

    #[test]
    fn test_restore_best_weights() {
        let var = Var::new(&[1f32], &Device::Cpu).unwrap();
        let vars = [var.clone()];
        let mut stopping = EarlyStopping::new(3);

        stopping.on_epoch_end(0, 0.4, &vars).unwrap();
        var.set(&Tensor::new(&[5f32], &Device::Cpu).unwrap()).unwrap();
        stopping.on_epoch_end(1, 0.6, &vars).unwrap();
        assert_eq!(scalar(&var), 5.0);

        assert_eq!(stopping.restore_best_weights().unwrap(), Some(0));
        assert_eq!(scalar(&var), 1.0);
    }
}
