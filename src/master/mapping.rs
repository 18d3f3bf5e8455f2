use log::*;
use crate::{
    command::*,
    entities::VarId,
    };
use super::{Client, Error};


impl Client {
    /// remove every group created on the device, structural groups remain
    pub async fn remove_groups(&self) -> Result<(), Error> {
        self.request(Message::empty(REMOVE_GROUPS), u8::from(Ack::Ok)).await?;
        Ok(())
    }
    /// create a group on the device, it takes the next free group ID
    pub async fn create_group(&self, variables: &[VarId]) -> Result<(), Error> {
        self.request(Message::new(CREATE_GROUP, variables.to_vec()), u8::from(Ack::Ok)).await?;
        Ok(())
    }
    /**
        install the model groups of the catalog on the device

        groups are created in ID order after removing previous ones, so the device assigns them the IDs the catalog expects
    */
    pub async fn configure_groups(&self) -> Result<(), Error> {
        self.remove_groups().await?;
        for group in self.catalog().custom_groups() {
            self.create_group(&group.variables).await?;
        }
        debug!("device {} configured with {} groups", self.address(), self.catalog().custom_groups().len());
        Ok(())
    }
}
